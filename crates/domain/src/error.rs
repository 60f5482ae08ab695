//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`BridgeError`]
//! via `#[from]` when it has to cross a port boundary.

/// Top-level error for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// An inbound payload could not be interpreted.
    #[error("malformed payload")]
    Payload(#[from] PayloadError),

    /// An outbound command was rejected before being sent.
    #[error("invalid command")]
    Command(#[from] CommandError),

    /// A target-state key expression could not be parsed.
    #[error("invalid target key")]
    TargetKey(#[from] TargetKeyError),

    /// The requested device or point does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// An adapter (cloud API, MQTT) failed.
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Why an inbound payload was dropped.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The bytes were not valid JSON.
    #[error("invalid JSON payload")]
    InvalidJson(#[source] serde_json::Error),

    /// The JSON document is valid but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// A data message carried no `params` map.
    #[error("payload has no `params` map")]
    MissingParams,

    /// An expected nested field is absent or has the wrong type.
    #[error("payload is missing `{0}`")]
    MissingField(&'static str),
}

/// Why an outbound command could not be built.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    /// The point is read-only.
    #[error("point `{0}` is read-only")]
    ReadOnly(String),

    /// A number point received a value outside its range.
    #[error("value {value} outside range {min}..={max}")]
    OutOfRange {
        /// Rejected value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// A select point received a value that is not one of its options.
    #[error("`{0}` is not a valid option")]
    UnknownOption(String),

    /// The value has the wrong JSON type for this point.
    #[error("expected a {expected} value")]
    WrongType {
        /// Human-readable expected type.
        expected: &'static str,
    },
}

/// A malformed target-state key expression.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetKeyError {
    /// The expression is empty after stripping the root marker.
    #[error("empty target key")]
    Empty,

    /// A `[index]` suffix was not a valid non-negative integer.
    #[error("invalid list index in `{0}`")]
    InvalidIndex(String),
}

/// Lookup miss for a device or point.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{entity} `{id}` not found")]
pub struct NotFoundError {
    /// Kind of thing that was looked up (`"Device"`, `"Point"`).
    pub entity: &'static str,
    /// The identifier that missed.
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_found_with_entity_and_id() {
        let err = NotFoundError {
            entity: "Device",
            id: "HJ31".to_string(),
        };
        assert_eq!(err.to_string(), "Device `HJ31` not found");
    }

    #[test]
    fn should_convert_payload_error_into_bridge_error() {
        let err: BridgeError = PayloadError::MissingParams.into();
        assert!(matches!(err, BridgeError::Payload(PayloadError::MissingParams)));
    }

    #[test]
    fn should_expose_source_of_payload_variant() {
        let err: BridgeError = PayloadError::NotAnObject.into();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "payload is not a JSON object");
    }

    #[test]
    fn should_display_out_of_range_bounds() {
        let err = CommandError::OutOfRange {
            value: 120.0,
            min: 50.0,
            max: 100.0,
        };
        assert_eq!(err.to_string(), "value 120 outside range 50..=100");
    }
}
