//! Blockchain sync telemetry and its classification into a progress bucket.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const WEEK_MS: u64 = 7 * DAY_MS;
const MONTH_MS: u64 = 30 * DAY_MS;

/// Lag below which the chain counts as current.
const UP_TO_DATE_THRESHOLD_MS: u64 = HOUR_MS;

/// Reasons reported by the sync engine for not making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impediment {
    /// Local storage is unavailable or full.
    Storage,
    /// No usable network connection.
    Network,
}

impl Impediment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Network => "network",
        }
    }
}

/// One snapshot of the sync engine's reported status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Timestamp of the best known chain head, if any block is known yet.
    pub best_chain_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub impediments: BTreeSet<Impediment>,
    /// Still processing historical blocks rather than following the tip.
    #[serde(default)]
    pub replaying: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Hours,
    Days,
    Weeks,
    Months,
}

impl Magnitude {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressClassification {
    UpToDate,
    CatchingUp {
        magnitude: Magnitude,
        value: u64,
        stalled: bool,
    },
    Unknown,
}

impl ProgressClassification {
    pub fn is_catching_up(&self) -> bool {
        matches!(self, Self::CatchingUp { .. })
    }
}

impl fmt::Display for ProgressClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Unknown => f.write_str("unknown"),
            Self::CatchingUp {
                magnitude,
                value,
                stalled,
            } => {
                let activity = if *stalled { "stalled" } else { "synchronizing" };
                write!(f, "{activity}, {value} {} behind", magnitude.as_str())
            }
        }
    }
}

/// Classify how far the local chain trails `now`.
///
/// A chain head in the future (clock skew) counts as zero lag.
pub fn classify(state: &SyncState, now: DateTime<Utc>) -> ProgressClassification {
    let Some(best_chain_date) = state.best_chain_date else {
        return ProgressClassification::Unknown;
    };

    let lag = u64::try_from((now - best_chain_date).num_milliseconds()).unwrap_or(0);
    if lag < UP_TO_DATE_THRESHOLD_MS || !state.replaying {
        return ProgressClassification::UpToDate;
    }

    let (magnitude, value) = if lag < 2 * DAY_MS {
        (Magnitude::Hours, lag / HOUR_MS)
    } else if lag < 2 * WEEK_MS {
        (Magnitude::Days, lag / DAY_MS)
    } else if lag < 90 * DAY_MS {
        (Magnitude::Weeks, lag / WEEK_MS)
    } else {
        (Magnitude::Months, lag / MONTH_MS)
    };

    ProgressClassification::CatchingUp {
        magnitude,
        value,
        stalled: !state.impediments.is_empty(),
    }
}
