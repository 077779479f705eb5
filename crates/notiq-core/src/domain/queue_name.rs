//! Composite queue names.
//!
//! A queue is addressed by the pair (service, queue), rendered as
//! `{service}:{queue}`, e.g. `subscription-service:subscription-events`.
//! One handler binding exists per composite name.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid queue name '{0}': expected non-empty service and queue without ':'")]
pub struct InvalidQueueName(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "QueueNameParts")]
pub struct QueueName {
    service: String,
    queue: String,
}

/// Unvalidated wire form; deserialization goes through `QueueName::new`.
#[derive(Deserialize)]
struct QueueNameParts {
    service: String,
    queue: String,
}

impl TryFrom<QueueNameParts> for QueueName {
    type Error = InvalidQueueName;

    fn try_from(parts: QueueNameParts) -> Result<Self, Self::Error> {
        Self::new(parts.service, parts.queue)
    }
}

impl QueueName {
    pub fn new(service: impl Into<String>, queue: impl Into<String>) -> Result<Self, InvalidQueueName> {
        let service = service.into();
        let queue = queue.into();
        if !Self::valid_part(&service) || !Self::valid_part(&queue) {
            return Err(InvalidQueueName(format!("{service}{SEPARATOR}{queue}")));
        }
        Ok(Self { service, queue })
    }

    /// Parse the composite form `{service}:{queue}`.
    pub fn parse(composite: &str) -> Result<Self, InvalidQueueName> {
        let (service, queue) = composite
            .split_once(SEPARATOR)
            .ok_or_else(|| InvalidQueueName(composite.to_string()))?;
        Self::new(service, queue)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The composite name as persisted in the `queue_name` column.
    pub fn composite(&self) -> String {
        self.to_string()
    }

    fn valid_part(part: &str) -> bool {
        !part.trim().is_empty() && !part.contains(SEPARATOR)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.service, SEPARATOR, self.queue)
    }
}
