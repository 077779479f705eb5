//! Domain model (IDs, queue names, notification records, ordering, outcomes, decisions).

pub mod billing_event;
pub mod decision;
pub mod ids;
pub mod notification;
pub mod ordering;
pub mod outcome;
pub mod queue_name;
pub mod retry;
pub mod state;

pub use billing_event::{Discount, SubscriptionBillingEvent, TransitionType};
pub use decision::{Decider, Decision, DefaultDecider};
pub use ids::{HostId, Id, IdMarker, NotificationId, SubjectId};
pub use notification::{NewNotification, Notification};
pub use ordering::{OrderingKey, TimedOrdering, sort_timed};
pub use outcome::{HandlerOutcome, OutcomeKind};
pub use queue_name::{InvalidQueueName, QueueName};
pub use retry::RetryPolicy;
pub use state::ProcessingState;
