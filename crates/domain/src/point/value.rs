//! Displayed value of a logical point.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current value of a point, as derived from the parameter map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// The key is missing or holds something that cannot be shown.
    #[default]
    Unknown,
}

impl PointValue {
    /// Integral floats collapse to [`Int`](Self::Int).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn number(value: f64) -> Self {
        let int = value as i64;
        if value.fract() == 0.0 && int as f64 == value {
            Self::Int(int)
        } else {
            Self::Float(value)
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("on"),
            Self::Bool(false) => f.write_str("off"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}
