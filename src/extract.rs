//! Dependency extraction from an evaluated template.
//!
//! Every scalar variable whose name ends in `depends` is a dependency list.
//! Arrays and associative arrays never qualify, even with a matching name.
//! Values are split on whitespace; an empty value still produces its key
//! with an empty list.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::DEPENDS_SUFFIX;
use crate::shell::{Environment, Value};

/// Dependency lists of one template, keyed by variable name.
///
/// Keys iterate in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencyRecord(BTreeMap<String, Vec<String>>);

impl DependencyRecord {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for DependencyRecord {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether `name` names a dependency variable.
#[must_use]
pub fn is_dependency_variable(name: &str) -> bool {
    name.ends_with(DEPENDS_SUFFIX)
}

/// Collect the dependency lists of a final environment.
#[must_use]
pub fn extract_dependencies(env: &Environment) -> DependencyRecord {
    env.iter()
        .filter(|(name, _)| is_dependency_variable(name))
        .filter_map(|(name, value)| match value {
            Value::Scalar(text) => Some((
                name.to_string(),
                text.split_whitespace().map(str::to_string).collect(),
            )),
            Value::Indexed(_) | Value::Associative(_) => {
                tracing::trace!("Skipping non-scalar {name}");
                None
            }
        })
        .collect()
}
