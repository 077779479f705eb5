//! NotificationKey trait - binds a key type to its persisted tag.
//!
//! # Points
//! - Associated constant (`const TAG`)
//! - Combined bounds (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A key that can be scheduled on a queue.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct NextBillingDate {
///     subscription_id: String,
/// }
///
/// impl NotificationKey for NextBillingDate {
///     const TAG: &'static str = "billing.next_billing_date.v1";
/// }
/// ```
///
/// # Bounds
/// - `Serialize`: encoded into `key_payload` at enqueue time
/// - `DeserializeOwned`: decoded from the stored row at dispatch time
/// - `Send + Sync + 'static`: handed to handlers on worker tasks
pub trait NotificationKey: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Persisted tag of this key shape.
    ///
    /// # Naming
    /// - `{namespace}.{key}.v{major}`
    /// - e.g. `billing.subscription.transition.v1`
    ///
    /// Bump the major version when the payload shape changes incompatibly;
    /// rows written under the old tag are then quarantined, not misread.
    const TAG: &'static str;
}
