//! notiq-core
//!
//! Durable, deferred notification queue: work items scheduled for a future
//! instant, claimed under time-bounded leases by any number of hosts sharing
//! one store, and delivered at least once to typed handlers.
//!
//! # Modules
//! - **domain**: model (ids, queue names, notification records, ordering rule, outcomes, decisions, billing events)
//! - **ports**: abstractions (NotificationStore, Clock, IdGenerator)
//! - **typed**: typed key API (NotificationKey, Handler, DecoderRegistry, KeyCodec)
//! - **impls**: store implementations (in-memory, SQLite)
//! - **app**: dispatcher, queue registry, service facade and its builder
//! - **error**: service error type

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{DispatcherConfig, NotificationQueueService, ServiceBuilder};
pub use error::QueueError;
