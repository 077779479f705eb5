//! Status - operator view of one queue.

use serde::Serialize;

use crate::domain::QueueName;
use crate::ports::QueueCounts;

/// Snapshot of a queue: lifecycle flag, accepted key tags and row counts.
///
/// # Example
/// ```ignore
/// let status = service.status(&queue).await?;
/// println!("{}", serde_json::to_string_pretty(&status)?);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub queue_name: QueueName,
    pub started: bool,
    pub registered_tags: Vec<String>,
    pub counts: QueueCounts,
}
