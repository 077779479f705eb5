//! Handler outcome: what a handler reports after processing one key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    RetryableFailure,
    PermanentFailure,
}

/// Result of one handler invocation.
///
/// - `Success`: the work is done; the row becomes `PROCESSED`.
/// - `RetryableFailure`: try again later, within the retry budget.
/// - `PermanentFailure`: retrying is pointless; quarantine now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerOutcome {
    Success,
    RetryableFailure(String),
    PermanentFailure(String),
}

impl HandlerOutcome {
    pub fn success() -> Self {
        HandlerOutcome::Success
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        HandlerOutcome::RetryableFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        HandlerOutcome::PermanentFailure(reason.into())
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            HandlerOutcome::Success => OutcomeKind::Success,
            HandlerOutcome::RetryableFailure(_) => OutcomeKind::RetryableFailure,
            HandlerOutcome::PermanentFailure(_) => OutcomeKind::PermanentFailure,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            HandlerOutcome::Success => None,
            HandlerOutcome::RetryableFailure(reason) | HandlerOutcome::PermanentFailure(reason) => {
                Some(reason)
            }
        }
    }
}
