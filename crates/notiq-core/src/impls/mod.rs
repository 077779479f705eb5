//! Impls - store implementations.
//!
//! # Included
//! - **InMemoryNotificationStore**: tests and single-process embedding
//! - **SqliteNotificationStore**: durable, shared between hosts through one database

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryNotificationStore;
pub use self::sqlite::SqliteNotificationStore;
