//! Validated domain primitives shared across the kernel.
//!
//! Every identifier, capacity, and duration that flows between components is a
//! distinct `nutype`-validated newtype rather than a bare `String`/`u32`/`u64`, so
//! illegal values (an empty subsystem name, a zero-capacity queue) are rejected at
//! the boundary instead of surfacing as a misbehaving runtime later.

use nutype::nutype;
#[allow(unused_imports)]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a [`crate::message::Message`].
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh, non-empty identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Correlation id used to route a reply back to its waiter.
///
/// Structurally identical to [`MessageId`] (a correlation id *is* the original
/// request's id) but kept as a distinct type so a `CorrelationId` can never be
/// passed where a fresh `MessageId` is expected, or vice versa.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display))]
pub struct CorrelationId(Uuid);

impl From<MessageId> for CorrelationId {
    fn from(id: MessageId) -> Self {
        Self::new(id.into_inner())
    }
}

/// Distributed tracing identifier stamped on a message at creation.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct TraceId(String);

impl TraceId {
    /// Generates a fresh trace id from a random UUID.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).unwrap_or_else(|_| unreachable!())
    }
}

/// Canonical, dotted or slash-free name of a subsystem (also its routing scheme).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct SubsystemName(String);

/// The `kind` key a [`crate::facet::Facet`] is registered under in a `FacetManager`.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct FacetKind(String);

/// Opaque identity token for the source of a hook/facet declaration (e.g. a module name).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct SourceId(String);

/// Routing scope label consulted by the capability model (e.g. `"workspace:create"`).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct ScopeName(String);

/// Unique identifier for a principal, carried inside its [`crate::kernel::access_control::Pkr`].
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display))]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Opaque public-key token presented to authorize a send; identity is
/// conveyed by this token's equality, never by the `PrincipalId` alone
/// (§3.3 ownership note).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 512),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)
)]
pub struct PublicKeyToken(String);

/// Capacity of a [`crate::queue::BoundedQueue`]; always at least one slot.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default
    ),
    default = 1000
)]
pub struct QueueCapacity(usize);

/// Maximum number of messages a `SubsystemScheduler` will drain in one granted slice.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default),
    default = 100
)]
pub struct MaxMessagesPerSlice(usize);

/// Wall-clock budget granted to a subsystem by the `GlobalScheduler`, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default),
    default = 1000
)]
pub struct SliceDurationMs(u64);

impl SliceDurationMs {
    /// Returns the slice duration as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Timeout applied to a one-shot `performRequest`, in milliseconds. Default 10s per §5.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default),
    default = 10_000
)]
pub struct RequestTimeoutMs(u64);

impl RequestTimeoutMs {
    /// Returns the timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Fixed capacity of the `BoundedErrorStore` ring buffer.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default),
    default = 1000
)]
pub struct ErrorStoreCapacity(usize);

/// Priority weight used by the `priority` scheduling strategies; higher runs sooner.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 1000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default),
    default = 0
)]
pub struct SchedulingPriority(i64);
