use std::collections::{HashMap, HashSet};

use crate::errors::{RcsimError, RcsimResult};
use crate::variable::{ConstantValue, FloatValue};

/// Holds the constants of one model instance.
///
/// Constants are single-assignment: they are bound while the `Initial`
/// section is collected and may be replaced at most once per name by a
/// run-time override supplied before the run starts. Once [`freeze`] is
/// called, at the start of integration, any further mutation fails with the
/// frozen-constants error.
///
/// [`freeze`]: ConstantStore::freeze
#[derive(Debug, Clone, Default)]
pub struct ConstantStore {
    values: HashMap<String, ConstantValue>,
    overridden: HashSet<String>,
    frozen: bool,
}

impl ConstantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a constant. Legal only while the store is unfrozen and the name
    /// is not already bound.
    pub fn bind(&mut self, name: &str, value: ConstantValue) -> RcsimResult<()> {
        if self.frozen {
            return Err(RcsimError::State(format!("cannot bind constant {name}")));
        }
        if self.values.contains_key(name) {
            return Err(RcsimError::Definition(format!(
                "constant {name} is already defined"
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Replace a bound constant with a run-time value.
    ///
    /// Callable exactly once per name, before the first evaluation of the
    /// run. The override takes precedence over the value bound in `Initial`.
    pub fn override_value(&mut self, name: &str, value: ConstantValue) -> RcsimResult<()> {
        if self.frozen {
            return Err(RcsimError::State(format!("cannot override constant {name}")));
        }
        if !self.values.contains_key(name) {
            return Err(RcsimError::Definition(format!(
                "cannot override unknown constant {name}"
            )));
        }
        if !self.overridden.insert(name.to_string()) {
            return Err(RcsimError::State(format!(
                "constant {name} was already overridden for this run"
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConstantValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Reject further mutation. Called when integration begins.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Numeric view of every constant, used to seed an evaluation scope.
    pub fn as_scope_values(&self) -> HashMap<String, FloatValue> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.as_float()))
            .collect()
    }
}
