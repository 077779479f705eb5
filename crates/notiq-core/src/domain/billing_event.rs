//! Subscription billing events: the timed domain events the queue sequences.
//!
//! An event is built once by the subscription layer and never mutated. Its
//! position on the timeline comes from the shared ordering rule
//! (`TimedOrdering`), using the catalog effective date captured when the
//! event was created rather than anything looked up later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::ordering::TimedOrdering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionType {
    Create,
    Transfer,
    Change,
    Cancel,
    Uncancel,
    UndoChange,
    Phase,
    Pause,
    Resume,
    BcdChange,
    ExpiredBundle,
}

/// Discount attached to an event. Carried as data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub name: String,
    /// Fixed amount in minor currency units.
    pub amount_minor: Option<i64>,
    /// Percentage in basis points.
    pub percent_bps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionBillingEvent {
    transition_type: TransitionType,
    plan: String,
    phase: String,
    effective_date: DateTime<Utc>,
    total_ordering: i64,
    bcd_local: Option<u8>,
    quantity: Option<u32>,
    catalog_effective_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    discounts: Vec<Discount>,
}

impl SubscriptionBillingEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transition_type: TransitionType,
        plan: impl Into<String>,
        phase: impl Into<String>,
        effective_date: DateTime<Utc>,
        total_ordering: i64,
        bcd_local: Option<u8>,
        quantity: Option<u32>,
        catalog_effective_date: DateTime<Utc>,
    ) -> Self {
        Self {
            transition_type,
            plan: plan.into(),
            phase: phase.into(),
            effective_date,
            total_ordering,
            bcd_local,
            quantity,
            catalog_effective_date,
            discounts: Vec::new(),
        }
    }

    pub fn with_discounts(mut self, discounts: Vec<Discount>) -> Self {
        self.discounts = discounts;
        self
    }

    pub fn transition_type(&self) -> TransitionType {
        self.transition_type
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn bcd_local(&self) -> Option<u8> {
        self.bcd_local
    }

    pub fn quantity(&self) -> Option<u32> {
        self.quantity
    }

    pub fn discounts(&self) -> &[Discount] {
        &self.discounts
    }

    /// Position on the billing timeline only. Two different events can be
    /// `Equal` here; `Ord` breaks such ties on the descriptive fields.
    pub fn timeline_cmp(&self, other: &Self) -> Ordering {
        self.cmp_timed(other)
    }
}

impl Ord for SubscriptionBillingEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timeline_cmp(other)
            .then_with(|| self.transition_type.cmp(&other.transition_type))
            .then_with(|| self.plan.cmp(&other.plan))
            .then_with(|| self.phase.cmp(&other.phase))
            .then_with(|| self.bcd_local.cmp(&other.bcd_local))
            .then_with(|| self.quantity.cmp(&other.quantity))
    }
}

impl PartialOrd for SubscriptionBillingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TimedOrdering for SubscriptionBillingEvent {
    fn effective_date(&self) -> DateTime<Utc> {
        self.effective_date
    }

    fn total_ordering(&self) -> i64 {
        self.total_ordering
    }

    fn catalog_effective_date(&self) -> Option<DateTime<Utc>> {
        Some(self.catalog_effective_date)
    }
}

// Structural equality over the descriptive fields; discounts don't take part.
impl PartialEq for SubscriptionBillingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.transition_type == other.transition_type
            && self.plan == other.plan
            && self.phase == other.phase
            && self.effective_date == other.effective_date
            && self.total_ordering == other.total_ordering
            && self.bcd_local == other.bcd_local
            && self.quantity == other.quantity
            && self.catalog_effective_date == other.catalog_effective_date
    }
}

impl Eq for SubscriptionBillingEvent {}

impl Hash for SubscriptionBillingEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transition_type.hash(state);
        self.plan.hash(state);
        self.phase.hash(state);
        self.effective_date.hash(state);
        self.total_ordering.hash(state);
        self.bcd_local.hash(state);
        self.quantity.hash(state);
        self.catalog_effective_date.hash(state);
    }
}

impl fmt::Display for SubscriptionBillingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SubscriptionBillingEvent{{type={:?}, plan='{}', phase='{}', effective_date={}, \
             total_ordering={}, catalog_effective_date={}, bcd_local={:?}, quantity={:?}}}",
            self.transition_type,
            self.plan,
            self.phase,
            self.effective_date,
            self.total_ordering,
            self.catalog_effective_date,
            self.bcd_local,
            self.quantity,
        )
    }
}
