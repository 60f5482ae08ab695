//! Raw parameter → displayed value conversions.

use serde_json::Value;

use super::value::PointValue;

/// Upper bound accepted by [`ValueTransform::RemainingTime`].
pub const MAX_REMAINING: i64 = 5000;

/// How a sensor turns its raw parameter into a displayed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueTransform {
    #[default]
    Identity,
    /// Truncate to an integer, then divide by 10.
    Deci,
    /// Truncate to an integer, then divide by 100.
    Centi,
    /// Truncate to an integer, then multiply by 10.
    Deca,
    /// Values outside `0..=5000` read as 0.
    RemainingTime,
    /// Only strictly positive totals are taken; anything else keeps the
    /// previous reading.
    PositiveEnergy,
    /// List of error codes rendered as text.
    ErrorList,
}

/// Outcome of applying a transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Show this value.
    Value(PointValue),
    /// Keep whatever was shown before.
    Keep,
}

impl ValueTransform {
    /// Convert a raw parameter; `None` means the key is absent.
    #[must_use]
    pub fn apply(self, raw: Option<&Value>) -> Reading {
        if self == Self::ErrorList {
            return Reading::Value(error_list(raw));
        }

        let Some(number) = raw.and_then(Value::as_f64) else {
            return Reading::Value(PointValue::Unknown);
        };

        match self {
            Self::Identity => Reading::Value(PointValue::number(number)),
            Self::Deci => Reading::Value(PointValue::number(number.trunc() / 10.0)),
            Self::Centi => Reading::Value(PointValue::number(number.trunc() / 100.0)),
            Self::Deca => Reading::Value(PointValue::number(number.trunc() * 10.0)),
            Self::RemainingTime => {
                let minutes = truncate(number);
                let minutes = if (0..=MAX_REMAINING).contains(&minutes) {
                    minutes
                } else {
                    0
                };
                Reading::Value(PointValue::Int(minutes))
            }
            Self::PositiveEnergy => match truncate(number) {
                total if total > 0 => Reading::Value(PointValue::Int(total)),
                _ => Reading::Keep,
            },
            Self::ErrorList => Reading::Keep,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> i64 {
    value.trunc() as i64
}

fn error_list(raw: Option<&Value>) -> PointValue {
    match raw {
        None | Some(Value::Null) => PointValue::Text("No data".to_string()),
        Some(Value::Array(codes)) if codes.is_empty() => PointValue::Text("No errors".to_string()),
        Some(Value::Array(codes)) => PointValue::Text(
            codes
                .iter()
                .map(|code| match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Some(Value::String(s)) => PointValue::Text(s.clone()),
        Some(other) => PointValue::Text(other.to_string()),
    }
}
