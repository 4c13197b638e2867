//! Build option registry.
//!
//! Package templates condition parts of their dependency lists on named
//! boolean build options. The set of enabled options is assembled once from
//! `-o` flags and then frozen: evaluation only ever reads it, so the frozen
//! [`OptionSet`] is shared between workers behind an `Arc` without locking.
//!
//! # Flag Syntax
//!
//! Each flag value is a comma separated list of option names. A name enables
//! the option, a name prefixed with `~` disables it. Tokens are applied in
//! order, so the last mention of an option wins:
//!
//! ```rust
//! use xdeps_cli::config::OptionSet;
//!
//! let options = OptionSet::from_specs(["a,b,~a"]);
//! assert!(!options.is_enabled("a"));
//! assert!(options.is_enabled("b"));
//! ```

use std::collections::BTreeSet;

/// Prefix marking an option token as a removal.
const DISABLE_PREFIX: char = '~';

/// Mutable construction phase of an [`OptionSet`].
#[derive(Debug, Default)]
pub struct OptionSetBuilder {
    enabled: BTreeSet<String>,
}

impl OptionSetBuilder {
    /// Apply one `name[,name...]` specification.
    pub fn apply(&mut self, spec: &str) -> &mut Self {
        for token in spec.split(',').filter(|t| !t.is_empty()) {
            match token.strip_prefix(DISABLE_PREFIX) {
                Some(name) => {
                    self.enabled.remove(name);
                }
                None => {
                    self.enabled.insert(token.to_string());
                }
            }
        }
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> OptionSet {
        tracing::debug!(
            "Option registry frozen with {} enabled option(s): {:?}",
            self.enabled.len(),
            self.enabled
        );
        OptionSet {
            enabled: self.enabled,
        }
    }
}

/// Immutable set of enabled build options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    enabled: BTreeSet<String>,
}

impl OptionSet {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> OptionSetBuilder {
        OptionSetBuilder::default()
    }

    /// Build a registry from specifications applied in order.
    pub fn from_specs<I, S>(specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Self::builder();
        for spec in specs {
            builder.apply(spec.as_ref());
        }
        builder.build()
    }

    /// Whether `name` is enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Enabled option names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    /// Number of enabled options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    /// True when no option is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_tokens_override_earlier() {
        let options = OptionSet::from_specs(["a,b,~a"]);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_specs_apply_across_flags() {
        let options = OptionSet::from_specs(["gtk3,x11", "~x11", "wayland"]);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec!["gtk3", "wayland"]);
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_disable_then_enable() {
        let options = OptionSet::from_specs(["~ssl,ssl"]);
        assert!(options.is_enabled("ssl"));
    }

    #[test]
    fn test_empty_tokens_ignored() {
        let options = OptionSet::from_specs(["a,,b,", ""]);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_tokens_are_taken_verbatim() {
        let options = OptionSet::from_specs(["a, b"]);
        assert!(options.is_enabled("a"));
        assert!(options.is_enabled(" b"));
        assert!(!options.is_enabled("b"));
    }

    #[test]
    fn test_removing_unknown_option_is_noop() {
        let options = OptionSet::from_specs(["~nothing"]);
        assert!(options.is_empty());
    }
}
