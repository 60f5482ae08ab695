//! Status-code table: maps the `typeCode` of a status-coded message to the
//! flat-key prefix its fields are stored under.
//!
//! The table is an injected, immutable value rather than a global so that
//! device types (and tests) can supply their own mapping.
//!
//! Entries are `(module, status_code)` pairs such as `("pd", "pdStatus")`.
//! Devices emit either spelling as `typeCode`; a type code resolves to the
//! opposite side of its pair (`pdStatus` → `pd`, `bms_emsStatus` →
//! `emsStatus`). Status codes are checked first.

use std::collections::HashMap;

/// Pairwise `module ↔ status_code` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeTable {
    module_by_status: HashMap<String, String>,
    status_by_module: HashMap<String, String>,
}

impl StatusCodeTable {
    /// Build a table from `(module, status_code)` pairs.
    ///
    /// When two entries share a key the last one wins.
    #[must_use]
    pub fn new<I, M, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (M, S)>,
        M: Into<String>,
        S: Into<String>,
    {
        let mut module_by_status = HashMap::new();
        let mut status_by_module = HashMap::new();
        for (module, status) in pairs {
            let (module, status) = (module.into(), status.into());
            module_by_status.insert(status.clone(), module.clone());
            status_by_module.insert(module, status);
        }
        Self {
            module_by_status,
            status_by_module,
        }
    }

    /// Prefix for a type code, falling back to `unknown_<typeCode>`.
    #[must_use]
    pub fn prefix_for(&self, type_code: &str) -> String {
        self.module_by_status
            .get(type_code)
            .or_else(|| self.status_by_module.get(type_code))
            .cloned()
            .unwrap_or_else(|| format!("unknown_{type_code}"))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.status_by_module.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status_by_module.is_empty()
    }
}

impl Default for StatusCodeTable {
    /// The vendor's stock table.
    fn default() -> Self {
        Self::new([
            ("pd", "pdStatus"),
            ("mppt", "mpptStatus"),
            ("bms_emsStatus", "emsStatus"),
            ("bms_bmsStatus", "bmsStatus"),
            ("inv", "invStatus"),
            ("bms_slave", "bmsSlaveStatus"),
            ("bms_slave_bmsSlaveStatus_1", "bmsSlaveStatus_1"),
            ("bms_slave_bmsSlaveStatus_2", "bmsSlaveStatus_2"),
        ])
    }
}
