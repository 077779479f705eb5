//! Typed key API.
//!
//! Key tags are bound to types at compile time, and each handler is paired
//! statically with the key type it accepts.
//!
//! # Two layers
//! - **Typed surface**: `NotificationKey`, `Handler<K>`
//! - **Erased core**: `DynHandler` (object-safe), looked up by tag in a
//!   `DecoderRegistry`

pub mod codec;
pub mod handler;
pub mod key;
pub mod registry;

pub use self::codec::{CodecError, EncodedKey, KeyCodec};
pub use self::handler::{Delivery, DynHandler, Handler, TypedHandler};
pub use self::key::NotificationKey;
pub use self::registry::{DecoderRegistry, RegistryError};
