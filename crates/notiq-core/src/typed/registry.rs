//! DecoderRegistry - per-queue map from key tag to handler.
//!
//! # Points
//! - Type-erased trait objects in a HashMap
//! - Generic registration keeps the tag/handler pairing type-checked
//! - `Arc` for shared ownership with the dispatcher's worker tasks

use std::collections::HashMap;
use std::sync::Arc;

use super::codec::CodecError;
use super::handler::{Delivery, DynHandler, Handler, TypedHandler};
use super::key::NotificationKey;
use crate::domain::HandlerOutcome;

/// Handlers of one queue, keyed by `NotificationKey::TAG`.
///
/// # Example
/// ```ignore
/// let mut registry = DecoderRegistry::new();
/// registry.register::<NextBillingDate, _>(NextBillingDateHandler)?;
///
/// let outcome = registry.dispatch(&row.key_tag, &row.key_payload, &delivery).await?;
/// ```
///
/// A queue may accept several key shapes; each tag maps to exactly one handler.
#[derive(Default)]
pub struct DecoderRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for key tag '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("no handlers registered")]
    Empty,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K: NotificationKey, H: Handler<K> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let tag = K::TAG.to_string();
        if self.handlers.contains_key(&tag) {
            return Err(RegistryError::AlreadyRegistered(tag));
        }
        self.handlers
            .insert(tag, Arc::new(TypedHandler::<K, H>::new(handler)));
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with<K: NotificationKey, H: Handler<K> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.register::<K, H>(handler)?;
        Ok(self)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(tag).cloned()
    }

    /// Registered tags, sorted.
    pub fn registered_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode `payload` under `tag` and run the matching handler.
    pub async fn dispatch(
        &self,
        tag: &str,
        payload: &serde_json::Value,
        delivery: &Delivery,
    ) -> Result<HandlerOutcome, CodecError> {
        let handler = self
            .handlers
            .get(tag)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))?;
        handler.process_dyn(payload, delivery).await
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("tags", &self.registered_tags())
            .finish()
    }
}
