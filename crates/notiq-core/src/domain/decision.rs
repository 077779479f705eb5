//! Decision model: what to do with a claimed notification after its handler ran.
//!
//! The decider is pure: it looks at the row and the outcome and returns the
//! next action. Applying it to the store is the dispatcher's job.

use std::time::Duration;

use super::notification::Notification;
use super::outcome::HandlerOutcome;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Done; mark the row processed.
    MarkProcessed,

    /// Make the row available again after `delay`.
    Reschedule { delay: Duration, reason: String },

    /// Give up; keep the row for inspection.
    Quarantine { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, notification: &Notification, outcome: &HandlerOutcome) -> Decision;
}

/// Budget-based retry logic:
/// - retry while `error_count + 1 < max_retries`, backing off per `RetryPolicy`
/// - quarantine once the budget is exhausted
/// - quarantine permanent failures immediately
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    max_retries: u32,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, max_retries: u32) -> Self {
        Self {
            retry_policy,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), 3)
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, notification: &Notification, outcome: &HandlerOutcome) -> Decision {
        match outcome {
            HandlerOutcome::Success => Decision::MarkProcessed,
            HandlerOutcome::PermanentFailure(reason) => Decision::Quarantine {
                reason: format!("permanent failure: {reason}"),
            },
            HandlerOutcome::RetryableFailure(reason) => {
                let failures = notification.error_count.saturating_add(1);
                if failures < self.max_retries {
                    Decision::Reschedule {
                        delay: self.retry_policy.next_delay(notification.error_count),
                        reason: reason.clone(),
                    }
                } else {
                    Decision::Quarantine {
                        reason: format!(
                            "retries exhausted ({failures}/{}): {reason}",
                            self.max_retries
                        ),
                    }
                }
            }
        }
    }
}
