//! Request signing for the public API.
//!
//! The signed string is the canonical query (when there is one) followed by
//! `accessKey=…&nonce=…&timestamp=…`; the signature is the lowercase hex
//! HMAC-SHA256 of that string under the secret key.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::CloudError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_RANGE: std::ops::Range<u32> = 10_000..1_000_000;

/// Headers attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub nonce: String,
    pub timestamp: String,
    pub sign: String,
}

/// Parameters sorted by key and joined as `k=v&k=v`, unencoded.
pub(crate) fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign `query` with a fresh nonce and the current millisecond timestamp.
pub(crate) fn sign_now(
    access_key: &str,
    secret_key: &str,
    query: &str,
) -> Result<Signature, CloudError> {
    let nonce = rand::thread_rng().gen_range(NONCE_RANGE).to_string();
    let timestamp = chrono::Utc::now().timestamp_millis().to_string();
    let sign = sign(access_key, secret_key, query, &nonce, &timestamp)?;
    Ok(Signature {
        nonce,
        timestamp,
        sign,
    })
}

pub(crate) fn sign(
    access_key: &str,
    secret_key: &str,
    query: &str,
    nonce: &str,
    timestamp: &str,
) -> Result<String, CloudError> {
    let mut message = format!("accessKey={access_key}&nonce={nonce}&timestamp={timestamp}");
    if !query.is_empty() {
        message = format!("{query}&{message}");
    }

    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| CloudError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
