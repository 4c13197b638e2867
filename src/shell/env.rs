//! Variable storage for a running script.

use std::collections::BTreeMap;

/// Value bound to a shell variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    Indexed(Vec<String>),
    Associative(BTreeMap<String, String>),
}

impl Value {
    /// The value as seen by a plain `$name` reference.
    ///
    /// Arrays yield their first element, like bash.
    pub fn as_scalar(&self) -> String {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Indexed(items) => items.first().cloned().unwrap_or_default(),
            Self::Associative(map) => map.get("0").cloned().unwrap_or_default(),
        }
    }

    /// All elements, in order, as `${name[@]}` yields them.
    pub fn elements(&self) -> Vec<String> {
        match self {
            Self::Scalar(value) => vec![value.clone()],
            Self::Indexed(items) => items.clone(),
            Self::Associative(map) => map.values().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub value: Value,
    pub exported: bool,
}

impl Variable {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            exported: false,
        }
    }
}

/// Every variable assigned while a script ran, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, Variable>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.vars.get(name).map(|var| &var.value)
    }

    /// The variable's value if it is bound to a plain string.
    pub fn scalar(&self, name: &str) -> Option<&str> {
        match self.value(name) {
            Some(Value::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Bind `name`, keeping its export flag if it already existed.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.vars.get_mut(name) {
            Some(var) => var.value = value,
            None => {
                self.vars.insert(name.to_string(), Variable::new(value));
            }
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, Value::Scalar(value.into()));
    }

    /// Assign one element of an array, converting a scalar into an
    /// indexed array first.
    pub fn set_element(&mut self, name: &str, key: &str, value: String) {
        let current = self.vars.get(name).map(|var| var.value.clone());
        let updated = match current {
            Some(Value::Associative(mut map)) => {
                map.insert(key.to_string(), value);
                Value::Associative(map)
            }
            Some(Value::Indexed(mut items)) => {
                set_index(&mut items, key, value);
                Value::Indexed(items)
            }
            Some(Value::Scalar(existing)) => {
                let mut items = vec![existing];
                set_index(&mut items, key, value);
                Value::Indexed(items)
            }
            None => {
                let mut items = Vec::new();
                set_index(&mut items, key, value);
                Value::Indexed(items)
            }
        };
        self.set(name, updated);
    }

    /// Insert or replace a whole variable, including its flags.
    pub fn restore(&mut self, name: &str, var: Option<Variable>) {
        match var {
            Some(var) => {
                self.vars.insert(name.to_string(), var);
            }
            None => {
                self.vars.remove(name);
            }
        }
    }

    pub fn unset(&mut self, name: &str) -> Option<Variable> {
        self.vars.remove(name)
    }

    pub fn export(&mut self, name: &str) {
        match self.vars.get_mut(name) {
            Some(var) => var.exported = true,
            None => {
                self.vars.insert(
                    name.to_string(),
                    Variable {
                        value: Value::Scalar(String::new()),
                        exported: true,
                    },
                );
            }
        }
    }

    /// Exported variables bound to plain strings, for child processes.
    pub fn exported_scalars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().filter_map(|(name, var)| match &var.value {
            Value::Scalar(value) if var.exported => Some((name.as_str(), value.as_str())),
            _ => None,
        })
    }

    /// All bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(name, var)| (name.as_str(), &var.value))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn set_index(items: &mut Vec<String>, key: &str, value: String) {
    let index = key.trim().parse::<usize>().unwrap_or(0);
    if index >= items.len() {
        items.resize(index + 1, String::new());
    }
    items[index] = value;
}
