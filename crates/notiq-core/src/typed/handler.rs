//! Handler trait - processes one decoded key.
//!
//! # Points
//! - Generic trait (`Handler<K>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure (`TypedHandler<K, H>` -> `DynHandler`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;

use super::codec::{CodecError, KeyCodec};
use super::key::NotificationKey;
use crate::domain::{HandlerOutcome, NotificationId, SubjectId};

/// Row context handed to a handler alongside the decoded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub notification_id: NotificationId,
    pub subject_id: SubjectId,
    pub effective_date: DateTime<Utc>,
    /// Failures recorded before this attempt.
    pub error_count: u32,
}

impl Delivery {
    /// 1 on first delivery.
    pub fn attempt(&self) -> u32 {
        self.error_count.saturating_add(1)
    }
}

/// Processes keys of type `K`.
///
/// Delivery is at-least-once: the same row may reach a handler twice after a
/// lease expires, and a row may be cancelled while its handler runs. Handlers
/// should be idempotent and re-check the subject's state before acting.
///
/// # Example
/// ```ignore
/// struct NextBillingDateHandler;
///
/// #[async_trait]
/// impl Handler<NextBillingDate> for NextBillingDateHandler {
///     async fn process(&self, key: NextBillingDate, delivery: &Delivery) -> HandlerOutcome {
///         HandlerOutcome::success()
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<K: NotificationKey>: Send + Sync {
    async fn process(&self, key: K, delivery: &Delivery) -> HandlerOutcome;
}

/// Object-safe form of `Handler`, keyed by tag.
///
/// Decoding happens here, so a payload that does not fit `K` surfaces as a
/// `CodecError` instead of reaching the handler.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn process_dyn(
        &self,
        payload: &serde_json::Value,
        delivery: &Delivery,
    ) -> Result<HandlerOutcome, CodecError>;

    fn key_tag(&self) -> &'static str;
}

pub struct TypedHandler<K: NotificationKey, H: Handler<K>> {
    handler: H,
    _marker: PhantomData<fn() -> K>,
}

impl<K: NotificationKey, H: Handler<K>> TypedHandler<K, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K: NotificationKey, H: Handler<K>> DynHandler for TypedHandler<K, H> {
    async fn process_dyn(
        &self,
        payload: &serde_json::Value,
        delivery: &Delivery,
    ) -> Result<HandlerOutcome, CodecError> {
        let key: K = KeyCodec::decode(K::TAG, payload)?;
        Ok(self.handler.process(key, delivery).await)
    }

    fn key_tag(&self) -> &'static str {
        K::TAG
    }
}
