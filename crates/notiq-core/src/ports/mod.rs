//! Ports - abstraction layer.
//!
//! Each trait here is a seam to something outside the queue logic: the
//! backing store, time and ID generation. Implementations live in `impls`.

pub mod clock;
pub mod id_generator;
pub mod notification_store;

pub use self::clock::{Clock, ManualClock, SystemClock, add_duration};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification_store::{NotificationStore, QueueCounts, StoreError};
