//! Re-engagement cadence for departed members.
//!
//! Every known member is in one of four states, derived from its departure
//! record (or the absence of one):
//!
//! - `Joined`: no record, the member is assumed to still be in the channel
//! - `AwaitingFirstContact`: departed, no notice delivered yet
//! - `AwaitingFollowup`: departed, at least one notice delivered
//! - `Exhausted`: the notice cap is reached, nothing more is ever sent
//!
//! Transitions are driven by what a reconciliation pass observes
//! (departed / member) and by a successful notice delivery.

use serde::{Deserialize, Serialize};

/// Unix time in seconds. Fractional so that files written by older
/// deployments (which stored `time.time()` floats) keep loading.
pub type UnixSeconds = f64;

pub const DEFAULT_FIRST_CONTACT_DELAY_SECS: u64 = 60;
pub const DEFAULT_FOLLOWUP_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_MAX_NOTICES: u32 = 30;

/// Current wall-clock time as [`UnixSeconds`].
pub fn now_unix() -> UnixSeconds {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Per-member departure state as persisted in the departures file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DepartureRecord {
    #[serde(rename = "count", default)]
    pub occurrence_count: u32,
    #[serde(rename = "first_sent_at", default)]
    pub first_notice_at: Option<UnixSeconds>,
    #[serde(rename = "last_sent_at", default)]
    pub last_notice_at: Option<UnixSeconds>,
}

impl DepartureRecord {
    /// Record for a member observed departed for the first time at `now`.
    pub fn entered_at(now: UnixSeconds) -> Self {
        Self {
            occurrence_count: 0,
            first_notice_at: Some(now),
            last_notice_at: None,
        }
    }

    /// Apply a successful notice delivery at `now`.
    pub fn record_sent(&mut self, now: UnixSeconds) {
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.last_notice_at = Some(now);
        self.first_notice_at.get_or_insert(now);
    }
}

/// Timing and volume limits of the cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadencePolicy {
    /// Wait after the departure is first observed before the first notice.
    pub first_contact_delay_secs: u64,
    /// Minimum gap between two consecutive notices.
    pub followup_interval_secs: u64,
    /// Total notices a member can ever receive.
    pub max_notices: u32,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            first_contact_delay_secs: DEFAULT_FIRST_CONTACT_DELAY_SECS,
            followup_interval_secs: DEFAULT_FOLLOWUP_INTERVAL_SECS,
            max_notices: DEFAULT_MAX_NOTICES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetentionState {
    Joined,
    AwaitingFirstContact { since: UnixSeconds },
    AwaitingFollowup { last_notice_at: UnixSeconds },
    Exhausted,
}

impl CadencePolicy {
    /// Classify a member from its (optional) departure record.
    ///
    /// A record missing `first_notice_at` is only possible in hand-edited or
    /// legacy files; it is treated as entering the departed state now.
    pub fn state_of(&self, record: Option<&DepartureRecord>, now: UnixSeconds) -> RetentionState {
        let Some(record) = record else {
            return RetentionState::Joined;
        };

        if record.occurrence_count >= self.max_notices {
            return RetentionState::Exhausted;
        }

        match (record.first_notice_at, record.last_notice_at) {
            (_, Some(last)) => RetentionState::AwaitingFollowup {
                last_notice_at: last,
            },
            (Some(first), None) => RetentionState::AwaitingFirstContact { since: first },
            (None, None) => RetentionState::AwaitingFirstContact { since: now },
        }
    }

    /// Transition for "poll observed the member as departed".
    ///
    /// Entering the departed state is the only place `first_notice_at` is
    /// stamped; an existing record keeps its history.
    pub fn observe_departed(
        &self,
        existing: Option<DepartureRecord>,
        now: UnixSeconds,
    ) -> DepartureRecord {
        match existing {
            None => DepartureRecord::entered_at(now),
            Some(mut record) => {
                if record.first_notice_at.is_none() && record.last_notice_at.is_none() {
                    record.first_notice_at = Some(now);
                }
                record
            }
        }
    }

    /// Whether a notice is due for this record at `now`.
    pub fn is_due(&self, record: &DepartureRecord, now: UnixSeconds) -> bool {
        match self.state_of(Some(record), now) {
            RetentionState::Joined | RetentionState::Exhausted => false,
            RetentionState::AwaitingFirstContact { since } => {
                now - since >= self.first_contact_delay_secs as f64
            }
            RetentionState::AwaitingFollowup { last_notice_at } => {
                now - last_notice_at >= self.followup_interval_secs as f64
            }
        }
    }

    pub fn is_exhausted(&self, record: &DepartureRecord) -> bool {
        record.occurrence_count >= self.max_notices
    }
}
