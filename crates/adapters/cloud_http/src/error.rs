//! Cloud adapter error types.

use efbridge_domain::error::BridgeError;

/// Errors specific to the cloud REST adapter.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// The request could not be sent or the body could not be read.
    #[error("cloud request failed")]
    Http(#[source] reqwest::Error),

    /// The server answered with a non-200 status.
    #[error("cloud returned HTTP {status}")]
    Status {
        /// Numeric HTTP status.
        status: u16,
    },

    /// The body was not valid JSON.
    #[error("cloud response is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    /// The body was JSON but not in the expected shape.
    #[error("unexpected cloud response shape at `{0}`")]
    Shape(&'static str),

    /// The API answered with a non-zero result code.
    #[error("cloud rejected request with code {code}: {message}")]
    Api {
        /// Vendor result code.
        code: String,
        /// Vendor message.
        message: String,
    },

    /// The secret key cannot be used as an HMAC key.
    #[error("invalid signing key")]
    InvalidKey,
}

impl CloudError {
    /// Convert into a [`BridgeError::Transport`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        BridgeError::Transport(Box::new(self))
    }
}

impl From<CloudError> for BridgeError {
    fn from(err: CloudError) -> Self {
        err.into_domain()
    }
}
