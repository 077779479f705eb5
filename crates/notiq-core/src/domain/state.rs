//! Processing state machine for a notification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of a notification row.
///
/// State transitions:
/// - Available -> InProcessing -> Processed
/// - Available -> InProcessing -> Available (retry, error_count bumped)
/// - Available -> InProcessing -> Quarantined (budget exhausted, permanent or decode failure)
/// - {Available, InProcessing} -> Removed (cancellation)
///
/// Processed, Quarantined and Removed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    /// Waiting for its effective date, or ready to be claimed.
    Available,

    /// Leased by a host (`owner_host` + `lease_expiry` are set).
    InProcessing,

    /// Handler reported success.
    Processed,

    /// Failed for good; kept for operator inspection.
    Quarantined,

    /// Cancelled before completion.
    Removed,
}

impl ProcessingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingState::Processed | ProcessingState::Quarantined | ProcessingState::Removed
        )
    }

    /// Not finished yet (may still be dispatched).
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingState::Available => "AVAILABLE",
            ProcessingState::InProcessing => "IN_PROCESSING",
            ProcessingState::Processed => "PROCESSED",
            ProcessingState::Quarantined => "QUARANTINED",
            ProcessingState::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(ProcessingState::Available),
            "IN_PROCESSING" => Ok(ProcessingState::InProcessing),
            "PROCESSED" => Ok(ProcessingState::Processed),
            "QUARANTINED" => Ok(ProcessingState::Quarantined),
            "REMOVED" => Ok(ProcessingState::Removed),
            other => Err(format!("unknown processing state: {other}")),
        }
    }
}
