//! Liveness state machine: infers online/offline from polling cadence.
//!
//! The upstream transport gives no reliable disconnect signal, so liveness is
//! derived from how many consecutive poll cycles passed without
//! [`DeviceData::last_received_time`](crate::store::DeviceData::last_received_time)
//! advancing (the *skip count*).
//!
//! ```text
//!            skip == 0                  skip >= T (Plain, Reconnect)
//! Unknown ─────────────► Online ─────────────────────────────► Offline
//!    │                     │ ▲        skip >= 2T (QuotaRepoll)     │
//!    │                     │ └─────────────────────────────────────┘
//!    └─────────────────────┼──────────► Offline        skip == 0
//!                          │
//!                          ├─ QuotaRepoll: T <= skip < 2T → RequestQuota each cycle
//!                          └─ Reconnect:   skip ∈ {3, 5, 7} → Reconnect
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::{self, Timestamp};

/// Wall-clock window after which a silent device is assumed offline.
pub const DEFAULT_OFFLINE_WINDOW_SECS: u64 = 120;

/// Lower bound of the effective poll interval.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Skip counts at which the reconnect policy forces a transport reconnect.
pub const RECONNECT_CHECKPOINTS: [u32; 3] = [3, 5, 7];

/// Effective poll interval for a configured refresh period.
#[must_use]
pub fn effective_interval(refresh_period_secs: u64) -> u64 {
    refresh_period_secs.max(MIN_POLL_INTERVAL_SECS)
}

/// Offline threshold in poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    offline: u32,
}

impl LivenessThresholds {
    /// Threshold of `offline_cycles`, at least 1.
    #[must_use]
    pub fn new(offline_cycles: u32) -> Self {
        Self {
            offline: offline_cycles.max(1),
        }
    }

    /// Threshold matching `window_secs` of wall clock at `interval_secs` per
    /// cycle (integer division, interval clamped to [`MIN_POLL_INTERVAL_SECS`]).
    #[must_use]
    pub fn from_window(window_secs: u64, interval_secs: u64) -> Self {
        let cycles = window_secs / effective_interval(interval_secs);
        Self::new(u32::try_from(cycles).unwrap_or(u32::MAX))
    }

    /// `T`: skipped cycles before a device counts as offline.
    #[must_use]
    pub fn offline(self) -> u32 {
        self.offline
    }

    /// `2T`: hard offline for the quota re-poll policy.
    #[must_use]
    pub fn hard_offline(self) -> u32 {
        self.offline.saturating_mul(2)
    }
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self::from_window(DEFAULT_OFFLINE_WINDOW_SECS, 60)
    }
}

/// Escalation behaviour of a device's status point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Online/offline only.
    #[default]
    Plain,
    /// Re-fetch the bulk quota between `T` and `2T`, offline at `2T`.
    QuotaRepoll,
    /// Reconnect the transport at [`RECONNECT_CHECKPOINTS`] while online.
    Reconnect,
}

/// Inferred device status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    #[default]
    Unknown,
    Online,
    /// Assumed offline; no explicit signal exists.
    Offline,
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "assume_offline",
        })
    }
}

/// Side effect the caller must carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Fire-and-forget bulk quota re-fetch for this device.
    RequestQuota,
    /// Force a transport reconnect.
    Reconnect,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether anything observable (state or counters) changed.
    pub changed: bool,
    pub state: LivenessState,
    pub skip_count: u32,
    pub actions: Vec<LivenessAction>,
}

/// Per-device liveness tracker.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    policy: LivenessPolicy,
    thresholds: LivenessThresholds,
    state: LivenessState,
    skip_count: u32,
    high_water: Timestamp,
    last_data_update: Option<Timestamp>,
    cycle_pending: bool,
    quota_requests: u64,
    reconnects: u64,
    reconnect_phase: u32,
}

impl LivenessTracker {
    #[must_use]
    pub fn new(policy: LivenessPolicy, thresholds: LivenessThresholds) -> Self {
        Self {
            policy,
            thresholds,
            state: LivenessState::Unknown,
            skip_count: 0,
            high_water: time::never(),
            last_data_update: None,
            cycle_pending: false,
            quota_requests: 0,
            reconnects: 0,
            reconnect_phase: 0,
        }
    }

    /// Start a new poll cycle with the store's latest evidence of life, then
    /// evaluate.
    pub fn tick(&mut self, last_received: Timestamp) -> Evaluation {
        let advanced = last_received > self.high_water;
        if advanced {
            self.high_water = last_received;
            self.last_data_update = Some(last_received);
            self.skip_count = 0;
        } else {
            self.skip_count = self.skip_count.saturating_add(1);
        }
        self.cycle_pending = true;

        let mut evaluation = self.evaluate();
        evaluation.changed |= advanced;
        evaluation
    }

    /// Apply transitions for the current skip count.
    ///
    /// Side effects (actions, counters) happen at most once per cycle;
    /// re-evaluating without a new [`tick`](Self::tick) reports no change.
    pub fn evaluate(&mut self) -> Evaluation {
        let mut actions = Vec::new();
        let changed = if self.cycle_pending {
            self.cycle_pending = false;
            self.transition(&mut actions)
        } else {
            false
        };

        Evaluation {
            changed,
            state: self.state,
            skip_count: self.skip_count,
            actions,
        }
    }

    fn transition(&mut self, actions: &mut Vec<LivenessAction>) -> bool {
        let skip = self.skip_count;
        let offline = self.thresholds.offline();

        if self.policy == LivenessPolicy::Reconnect
            && self.state == LivenessState::Online
            && RECONNECT_CHECKPOINTS.contains(&skip)
        {
            self.reconnects += 1;
            self.reconnect_phase = skip;
            actions.push(LivenessAction::Reconnect);
            return true;
        }

        if skip == 0 {
            if self.state == LivenessState::Online {
                return false;
            }
            self.state = LivenessState::Online;
            self.reconnect_phase = 0;
            return true;
        }

        if self.state == LivenessState::Offline {
            return false;
        }

        match self.policy {
            LivenessPolicy::QuotaRepoll if skip >= self.thresholds.hard_offline() => {
                self.state = LivenessState::Offline;
                true
            }
            LivenessPolicy::QuotaRepoll if skip >= offline => {
                self.quota_requests += 1;
                actions.push(LivenessAction::RequestQuota);
                true
            }
            LivenessPolicy::Plain | LivenessPolicy::Reconnect if skip >= offline => {
                self.state = LivenessState::Offline;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn state(&self) -> LivenessState {
        self.state
    }

    #[must_use]
    pub fn skip_count(&self) -> u32 {
        self.skip_count
    }

    #[must_use]
    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    #[must_use]
    pub fn thresholds(&self) -> LivenessThresholds {
        self.thresholds
    }

    /// Time of the last observed data advance, if any.
    #[must_use]
    pub fn last_data_update(&self) -> Option<Timestamp> {
        self.last_data_update
    }

    #[must_use]
    pub fn quota_requests(&self) -> u64 {
        self.quota_requests
    }

    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Skip count at which the last reconnect fired; 0 after recovery.
    #[must_use]
    pub fn reconnect_phase(&self) -> u32 {
        self.reconnect_phase
    }
}
