//! Domain identifiers (strongly-typed IDs).
//!
//! Notification and subject IDs are ULIDs wrapped in a phantom-typed `Id<T>`,
//! so a `NotificationId` can never be passed where a `SubjectId` is expected.
//! ULIDs sort by creation time and can be generated on any host without
//! coordination.
//!
//! `HostId` is different: it names a service host (usually its hostname) and
//! is used as the lease owner, so it stays a plain string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` ("ntf-", "subj-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh random ID stamped with the current system time.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse the storage form (bare ULID, without the display prefix).
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self::from_ulid)
    }

    /// Storage form: the bare 26-char ULID.
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {}

impl IdMarker for Notification {
    fn prefix() -> &'static str {
        "ntf-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {}

impl IdMarker for Subject {
    fn prefix() -> &'static str {
        "subj-"
    }
}

/// Identifier of one scheduled work item.
pub type NotificationId = Id<Notification>;

/// Identifier of the entity a notification concerns (an account, a subscription, ...).
pub type SubjectId = Id<Subject>;

/// Name of the service host that owns a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// `{HOSTNAME}-{ulid}`, or `host-{ulid}` when `HOSTNAME` is unset.
    ///
    /// The ULID suffix is fresh per call, so two processes on one machine
    /// never share a lease owner.
    pub fn from_env() -> Self {
        let name = std::env::var("HOSTNAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "host".to_string());
        Self(format!("{name}-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
