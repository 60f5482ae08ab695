//! Battery-module discovery: finds `bp_addr.<serial>` records in the flat
//! parameter map and materialises each one exactly once per session.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::params::ParameterMap;

/// First key segment of every battery-module record.
pub const MODULE_MARKER: &str = "bp_addr";

/// Field holding the module's primary value (state of charge, %).
pub const PRIMARY_FIELD: &str = "bpSoc";

/// Fields copied into a module's attributes when present.
pub const ATTRIBUTE_FIELDS: [&str; 8] = [
    "bpSoh",
    "bpCycles",
    "bpTemp",
    "bpAccuChgEnergy",
    "bpAccuDsgEnergy",
    "bpVol",
    "bpAmp",
    "bpPwr",
];

/// Module prefix of a flat key (`bp_addr.HJ32.bpSoc` → `bp_addr.HJ32`).
///
/// Returns `None` when the key is not under [`MODULE_MARKER`] or has no
/// serial segment.
#[must_use]
pub fn module_prefix(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(MODULE_MARKER)?.strip_prefix('.')?;
    let serial_len = rest.find('.').unwrap_or(rest.len());
    if serial_len == 0 {
        return None;
    }
    Some(&key[..MODULE_MARKER.len() + 1 + serial_len])
}

/// Set of module prefixes already materialised for one device.
///
/// Prefixes are never removed, even when a module stops reporting.
#[derive(Debug, Clone, Default)]
pub struct ModuleTracker {
    known: BTreeSet<String>,
}

impl ModuleTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every unseen module prefix in `params`.
    ///
    /// Returns the newly seen prefixes in key order; a prefix is returned at
    /// most once over the tracker's lifetime.
    pub fn scan(&mut self, params: &ParameterMap) -> Vec<String> {
        let mut fresh = Vec::new();
        for key in params.keys() {
            if let Some(prefix) = module_prefix(key) {
                if !self.known.contains(prefix) {
                    self.known.insert(prefix.to_string());
                    fresh.push(prefix.to_string());
                }
            }
        }
        fresh
    }

    /// Number of materialised modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether no module has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Current view of one battery module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSnapshot {
    /// State of charge; `None` when absent or non-numeric.
    pub soc: Option<f64>,
    /// Auxiliary fields that are present, keyed by field name.
    pub attributes: BTreeMap<&'static str, Value>,
}

/// Read a module's fields from the current parameters. Missing fields are
/// simply left out.
#[must_use]
pub fn read_module(prefix: &str, params: &ParameterMap) -> ModuleSnapshot {
    let soc = module_field(params, prefix, PRIMARY_FIELD).and_then(Value::as_f64);
    let attributes = ATTRIBUTE_FIELDS
        .iter()
        .filter_map(|&name| module_field(params, prefix, name).map(|value| (name, value.clone())))
        .collect();

    ModuleSnapshot { soc, attributes }
}

fn module_field<'a>(params: &'a ParameterMap, prefix: &str, name: &str) -> Option<&'a Value> {
    params.get(&format!("{prefix}.{name}"))
}

/// Module serial from its prefix (`bp_addr.HJ32` → `HJ32`).
#[must_use]
pub fn module_serial(prefix: &str) -> &str {
    prefix
        .strip_prefix(MODULE_MARKER)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(prefix)
}
