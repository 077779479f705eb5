//! App - application layer.
//!
//! Combines the ports into the running queue.
//!
//! # Components
//! - **ServiceBuilder**: wiring and startup validation
//! - **NotificationQueueService**: the external facade
//! - **QueueRegistry**: queue name -> handlers + lifecycle flag
//! - **Dispatcher**: claim -> handle -> decide -> complete loop
//! - **QueueStatus**: operator view

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod service;
pub mod status;

pub use self::builder::{BuildError, ServiceBuilder};
pub use self::config::{DispatcherConfig, RetryConfig};
pub use self::dispatcher::{Dispatcher, DispatcherHandle, TickReport};
pub use self::registry::QueueRegistry;
pub use self::service::NotificationQueueService;
pub use self::status::QueueStatus;
