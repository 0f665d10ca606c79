use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value type used throughout the engine.
pub type FloatValue = f64;

/// Model time.
pub type Time = FloatValue;

/// Phase of a model run in which an assignment is legal.
///
/// Constants may only be bound during [`Section::Initial`]; intermediate
/// computation and the integration marker belong to [`Section::Dynamic`],
/// the sorted section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Initial,
    Dynamic,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Initial => write!(f, "Initial"),
            Section::Dynamic => write!(f, "Dynamic"),
        }
    }
}

/// Role of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// A fixed parameter bound once per model instance before integration.
    Constant,
    /// A quantity integrated over time.
    State,
    /// An algebraic quantity recomputed from constants and state on every
    /// evaluation.
    Intermediate,
}

/// Type of a constant, restricted to the three kinds a model may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantKind {
    Int,
    Float,
    Bool,
}

/// Value of a constant bound during the `Initial` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstantValue {
    Bool(bool),
    Int(i64),
    Float(FloatValue),
}

impl ConstantValue {
    pub fn kind(&self) -> ConstantKind {
        match self {
            ConstantValue::Bool(_) => ConstantKind::Bool,
            ConstantValue::Int(_) => ConstantKind::Int,
            ConstantValue::Float(_) => ConstantKind::Float,
        }
    }

    /// Numeric view used when seeding an evaluation scope.
    ///
    /// Booleans map to 1.0/0.0 so they can participate in equations the way
    /// ACSL logicals do.
    pub fn as_float(&self) -> FloatValue {
        match self {
            ConstantValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ConstantValue::Int(i) => *i as FloatValue,
            ConstantValue::Float(v) => *v,
        }
    }
}

impl From<FloatValue> for ConstantValue {
    fn from(value: FloatValue) -> Self {
        ConstantValue::Float(value)
    }
}

impl From<i64> for ConstantValue {
    fn from(value: i64) -> Self {
        ConstantValue::Int(value)
    }
}

impl From<bool> for ConstantValue {
    fn from(value: bool) -> Self {
        ConstantValue::Bool(value)
    }
}

/// A classified model variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub declaring_section: Section,
    /// Only present for constants.
    pub constant_type: Option<ConstantKind>,
}
