//! Value and dimension types for normalized parameter spaces.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

/// Parameter value that can be numeric, string, or boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer parameter.
    Int(i64),
    /// Decimal parameter.
    Float(f64),
    /// String parameter.
    String(String),
    /// Boolean parameter.
    Bool(bool),
}

impl ParamValue {
    /// Get as integer if applicable.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as float if applicable.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string.
    #[must_use]
    pub fn as_str(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Bool(v) => v.to_string(),
        }
    }

    /// Convert from a scalar JSON value. Non-scalars return `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            _ => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// One named axis of the parameter space with its resolved value list.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    /// Dimension name.
    pub name: String,
    /// Resolved candidate values; never empty.
    pub values: Vec<ParamValue>,
}

/// A validated parameter space: dimension name -> resolved value list,
/// in the caller's declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedParamSpace {
    dimensions: Vec<Dimension>,
}

impl NormalizedParamSpace {
    /// Create from resolved dimensions.
    #[must_use]
    pub const fn new(dimensions: Vec<Dimension>) -> Self {
        Self { dimensions }
    }

    /// Dimensions in declaration order.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    /// Whether the space has no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Combinatorial size: product of all dimension list lengths.
    /// An empty space yields 1 (the single empty combination).
    #[must_use]
    pub fn estimate(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|d| d.values.len() as u64)
            .product()
    }

    /// Look up a dimension's values by name.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[ParamValue]> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.values.as_slice())
    }
}

// Serializes as `{name: [values, ...], ...}` in dimension order, the shape
// the delegation protocol sends as `normalizedParamSpace`.
impl Serialize for NormalizedParamSpace {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.dimensions.len()))?;
        for dim in &self.dimensions {
            map.serialize_entry(&dim.name, &dim.values)?;
        }
        map.end()
    }
}

/// One concrete parameter combination.
pub type ParamCombo = HashMap<String, ParamValue>;
