//! IdGenerator port - notification ID generation.
//!
//! Stores ask the generator for IDs instead of calling `Ulid::new()`
//! directly, so the timestamp half of a ULID follows the injected clock.
//!
//! # Implementations
//! - **UlidGenerator**: ULID stamped from a `Clock`

use crate::domain::NotificationId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates notification IDs.
///
/// # ULID properties
/// - sortable by creation time
/// - generated without coordination between hosts
/// - 128-bit
pub trait IdGenerator: Send + Sync {
    fn generate_notification_id(&self) -> NotificationId;
}

/// ULID generator whose timestamp comes from `C`.
///
/// With a `ManualClock` the timestamp part is deterministic; the random part
/// still differs between calls.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_notification_id(&self) -> NotificationId {
        // Instants before the epoch clamp to 0.
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        NotificationId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_notification_id();
        let id2 = id_gen.generate_notification_id();
        let id3 = id_gen.generate_notification_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
        assert!(id1.to_string().starts_with("ntf-"));
    }

    #[test]
    fn timestamp_part_follows_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(ManualClock::new(fixed_time));

        let id1 = id_gen.generate_notification_id();
        let id2 = id_gen.generate_notification_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
