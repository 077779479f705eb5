use thiserror::Error;

use crate::domain::{InvalidQueueName, QueueName};
use crate::ports::StoreError;
use crate::typed::{CodecError, RegistryError};

/// Errors returned by `NotificationQueueService`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The key could not be encoded. Nothing was persisted.
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue not registered: {0}")]
    QueueNotRegistered(QueueName),

    #[error("queue already registered: {0}")]
    AlreadyRegistered(QueueName),

    #[error(transparent)]
    InvalidQueueName(#[from] InvalidQueueName),

    #[error("handler registry error: {0}")]
    Registry(#[from] RegistryError),
}
