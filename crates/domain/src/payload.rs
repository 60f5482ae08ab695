//! Payload normalizer: turns every known vendor wire shape into one flat
//! `{ "params": { flatKey: leaf }, ...passthrough }` message.
//!
//! Pure functions, no state. Shape detection is a separate classifier so the
//! precedence order can be checked on its own:
//!
//! | Order | Shape | Detected by | Keys produced |
//! |-------|-------|-------------|---------------|
//! | 1 | [`PayloadShape::StatusCoded`] | `typeCode` | `<table prefix>.<field>` |
//! | 2 | [`PayloadShape::CommandCoded`] | `cmdFunc` + `cmdId` | bare `<field>` or `<cmdFunc>_<cmdId>.<field>` |
//! | 3 | [`PayloadShape::BulkQuota`] | `code` + `message` + `data` | `data` keys verbatim, battery strings exploded |
//! | 4 | [`PayloadShape::Flat`] | anything else | unchanged |
//!
//! Nested objects are flattened with dot-joined keys so every produced value
//! is a leaf. The only exception is the raw JSON string of a battery module,
//! which stays next to its exploded fields.

use serde_json::{Map, Value};

use crate::discovery::MODULE_MARKER;
use crate::error::PayloadError;
use crate::params::ParameterMap;
use crate::status_codes::StatusCodeTable;

/// An inbound message as decoded from the wire. Immutable once received.
pub type RawMessage = Map<String, Value>;

const PARAMS: &str = "params";
const PARAM: &str = "param";
const DATA: &str = "data";

const EMS_ADDR: &str = "ems";
const EMS_PHASES: [&str; 3] = ["pcsAPhase", "pcsBPhase", "pcsCPhase"];
const MPPT_HEARTBEAT: &str = "mpptHeartBeat";
const MPPT_PV: &str = "mpptPv";

/// Decode a wire payload (bytes or text) into a [`RawMessage`].
///
/// Invalid UTF-8 is replaced rather than rejected.
///
/// # Errors
///
/// Returns [`PayloadError::InvalidJson`] for unparsable input and
/// [`PayloadError::NotAnObject`] when the document is not a JSON object.
pub fn decode(payload: impl AsRef<[u8]>) -> Result<RawMessage, PayloadError> {
    let text = String::from_utf8_lossy(payload.as_ref());
    match serde_json::from_str::<Value>(&text).map_err(PayloadError::InvalidJson)? {
        Value::Object(map) => Ok(map),
        _ => Err(PayloadError::NotAnObject),
    }
}

/// Wire shape of a raw message, decided once by [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{typeCode, params|param}`.
    StatusCoded { type_code: String },
    /// `{cmdFunc, cmdId, params|param}`; `ems_heartbeat` marks the
    /// `addr == "ems"`, `cmdId == 1` decomposition.
    CommandCoded { prefix: String, ems_heartbeat: bool },
    /// `{code, message, data}` as returned by the bulk-quota endpoint.
    BulkQuota,
    /// Already flat, or unrecognised.
    Flat,
}

/// Decide the wire shape of `raw`.
#[must_use]
pub fn classify(raw: &RawMessage) -> PayloadShape {
    if let Some(type_code) = raw.get("typeCode") {
        return PayloadShape::StatusCoded {
            type_code: scalar_text(type_code),
        };
    }

    if let (Some(cmd_func), Some(cmd_id)) = (raw.get("cmdFunc"), raw.get("cmdId")) {
        let ems_heartbeat =
            raw.get("addr").and_then(Value::as_str) == Some(EMS_ADDR) && cmd_id.as_i64() == Some(1);
        return PayloadShape::CommandCoded {
            prefix: format!("{}_{}", scalar_text(cmd_func), scalar_text(cmd_id)),
            ems_heartbeat,
        };
    }

    if raw.contains_key("code") && raw.contains_key("message") && raw.contains_key(DATA) {
        return PayloadShape::BulkQuota;
    }

    PayloadShape::Flat
}

/// How command-coded (`cmdFunc`/`cmdId`) fields are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKeying {
    /// Bare field names (public API devices).
    #[default]
    Bare,
    /// `<cmdFunc>_<cmdId>.<field>` (legacy private API devices).
    Prefixed,
}

/// Something the normalizer skipped without failing the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeIssue {
    /// A battery-module string under `key` was not a JSON object.
    EmbeddedJson { key: String, reason: String },
    /// `field` was expected to be an object and was not.
    NotAnObject { field: String },
}

impl std::fmt::Display for NormalizeIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmbeddedJson { key, reason } => {
                write!(f, "unable to parse embedded JSON in `{key}`: {reason}")
            }
            Self::NotAnObject { field } => write!(f, "`{field}` is not an object"),
        }
    }
}

/// Result of [`Normalizer::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub shape: PayloadShape,
    /// `{params, ...passthrough}`; `params` is absent only when the input
    /// carried no usable payload.
    pub message: RawMessage,
    /// Non-fatal problems, for the caller to log.
    pub issues: Vec<NormalizeIssue>,
}

/// Configured payload normalizer.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    status_codes: StatusCodeTable,
    command_keying: CommandKeying,
}

impl Normalizer {
    /// Normalizer with a custom status-code table.
    #[must_use]
    pub fn new(status_codes: StatusCodeTable, command_keying: CommandKeying) -> Self {
        Self {
            status_codes,
            command_keying,
        }
    }

    /// Normalize one raw message. Never fails; see [`Normalized::issues`].
    #[must_use]
    pub fn normalize(&self, raw: RawMessage) -> Normalized {
        let shape = classify(&raw);
        let mut issues = Vec::new();

        let message = match &shape {
            PayloadShape::StatusCoded { type_code } => {
                let prefix = self.status_codes.prefix_for(type_code);
                let (payloads, passthrough) = split_payload(raw, &[PARAMS, PARAM]);
                let mut params = ParameterMap::new();
                for (field, payload) in payloads {
                    flatten_fields(&mut params, Some(&prefix), &field, payload, &mut issues);
                }
                with_params(params, passthrough)
            }
            PayloadShape::CommandCoded {
                prefix,
                ems_heartbeat,
            } => {
                let prefix = match self.command_keying {
                    CommandKeying::Bare => None,
                    CommandKeying::Prefixed => Some(prefix.as_str()),
                };
                let (payloads, passthrough) = split_payload(raw, &[PARAM, PARAMS]);
                let mut params = ParameterMap::new();
                for (field, payload) in payloads {
                    if *ems_heartbeat && field == PARAM {
                        explode_ems_heartbeat(&mut params, prefix, payload, &mut issues);
                    } else {
                        flatten_fields(&mut params, prefix, &field, payload, &mut issues);
                    }
                }
                with_params(params, passthrough)
            }
            PayloadShape::BulkQuota => {
                let (mut payloads, passthrough) = split_payload(raw, &[DATA]);
                match payloads.pop() {
                    Some((_, Value::Object(data))) => {
                        with_params(explode_bulk_quota(data, &mut issues), passthrough)
                    }
                    _ => {
                        issues.push(NormalizeIssue::NotAnObject {
                            field: DATA.to_string(),
                        });
                        passthrough
                    }
                }
            }
            PayloadShape::Flat => raw,
        };

        Normalized {
            shape,
            message,
            issues,
        }
    }
}

/// Pull the named payload fields out of `raw`, in the given order.
fn split_payload(mut raw: RawMessage, fields: &[&str]) -> (Vec<(String, Value)>, RawMessage) {
    let payloads = fields
        .iter()
        .filter_map(|field| raw.remove(*field).map(|v| ((*field).to_string(), v)))
        .collect();
    (payloads, raw)
}

fn with_params(params: ParameterMap, mut passthrough: RawMessage) -> RawMessage {
    let params: Map<String, Value> = params.into_iter().collect();
    passthrough.insert(PARAMS.to_string(), Value::Object(params));
    passthrough
}

fn join(prefix: Option<&str>, field: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{field}"),
        None => field.to_string(),
    }
}

/// Flatten the object in `payload` under `prefix`; non-objects are reported.
fn flatten_fields(
    out: &mut ParameterMap,
    prefix: Option<&str>,
    field: &str,
    payload: Value,
    issues: &mut Vec<NormalizeIssue>,
) {
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_into(out, join(prefix, &key), value);
            }
        }
        _ => issues.push(NormalizeIssue::NotAnObject {
            field: field.to_string(),
        }),
    }
}

/// Insert `value` under `key`, recursing into objects with dot-joined keys.
fn flatten_into(out: &mut ParameterMap, key: String, value: Value) {
    match value {
        Value::Object(map) => {
            for (sub, value) in map {
                flatten_into(out, format!("{key}.{sub}"), value);
            }
        }
        leaf => {
            out.insert(key, leaf);
        }
    }
}

/// Decompose the EMS heartbeat: one record per phase, one per MPPT string
/// (`mpptPv1`, `mpptPv2`, …); remaining fields keep their bare names.
fn explode_ems_heartbeat(
    out: &mut ParameterMap,
    prefix: Option<&str>,
    payload: Value,
    issues: &mut Vec<NormalizeIssue>,
) {
    let Value::Object(mut param) = payload else {
        issues.push(NormalizeIssue::NotAnObject {
            field: PARAM.to_string(),
        });
        return;
    };

    for phase in EMS_PHASES {
        if let Some(value) = param.remove(phase) {
            flatten_fields(out, Some(phase), phase, value, issues);
        }
    }

    if let Some(heartbeat) = param.remove(MPPT_HEARTBEAT) {
        explode_mppt_heartbeat(out, heartbeat, issues);
    }

    for (key, value) in param {
        flatten_into(out, join(prefix, &key), value);
    }
}

fn explode_mppt_heartbeat(
    out: &mut ParameterMap,
    heartbeat: Value,
    issues: &mut Vec<NormalizeIssue>,
) {
    let Some(Value::Object(mut first)) = heartbeat.as_array().and_then(|list| list.first()).cloned()
    else {
        return;
    };

    if let Some(Value::Array(strings)) = first.remove(MPPT_PV) {
        for (index, string) in strings.into_iter().enumerate() {
            let name = format!("{MPPT_PV}{}", index + 1);
            flatten_fields(out, Some(&name), &name, string, issues);
        }
    }

    for (key, value) in first {
        flatten_into(out, format!("{MPPT_HEARTBEAT}.{key}"), value);
    }
}

/// Copy every `data` key, then explode battery-module JSON strings under
/// their own key as prefix. The raw string is kept either way.
fn explode_bulk_quota(
    data: Map<String, Value>,
    issues: &mut Vec<NormalizeIssue>,
) -> ParameterMap {
    let mut out = ParameterMap::new();
    let mut embedded = Vec::new();

    for (key, value) in data {
        if is_module_key(&key) {
            if let Value::String(text) = &value {
                embedded.push((key.clone(), text.clone()));
            }
        }
        flatten_into(&mut out, key, value);
    }

    for (key, text) in embedded {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(fields)) => {
                for (sub, value) in fields {
                    flatten_into(&mut out, format!("{key}.{sub}"), value);
                }
            }
            Ok(_) => issues.push(NormalizeIssue::EmbeddedJson {
                key,
                reason: "not a JSON object".to_string(),
            }),
            Err(err) => issues.push(NormalizeIssue::EmbeddedJson {
                key,
                reason: err.to_string(),
            }),
        }
    }

    out
}

fn is_module_key(key: &str) -> bool {
    key.strip_prefix(MODULE_MARKER)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Render a scalar without JSON quoting (`"ems"` → `ems`, `2` → `2`).
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
