//! Error taxonomy for the kernel.
//!
//! Every fallible operation returns one of the per-concern enums below rather than
//! a bare string, so a caller can reconstruct the user-visible failure shape from
//! §7 (`{success: false, type, message, details?}`) without re-parsing text.
//! [`KernelError`] aggregates them for call sites that don't care which concern
//! failed. Panics are reserved for violated invariants (a hook returning a facet
//! whose `kind` doesn't match its declaration, a mutable metadata field written
//! twice) — those are programmer errors, not runtime conditions.

use crate::domain_types::{FacetKind, SubsystemName};
use thiserror::Error;

/// Errors raised while building a subsystem's facet graph (§4.4).
#[derive(Error, Debug)]
pub enum BuildError {
    /// A hook declared a `kind` already present without `overwrite = true`.
    #[error("duplicate facet kind `{kind}` declared without overwrite")]
    DuplicateKind {
        /// The conflicting kind.
        kind: FacetKind,
    },

    /// A hook's factory returned a facet whose `kind` differs from the hook's declaration.
    #[error("hook for kind `{declared}` produced a facet of kind `{produced}`")]
    KindMismatch {
        /// Kind declared by the hook.
        declared: FacetKind,
        /// Kind actually produced by the hook's `fn`.
        produced: FacetKind,
    },

    /// A facet's `required` dependency was never registered.
    #[error("facet `{kind}` requires undeclared dependency `{missing}`")]
    MissingDependency {
        /// The facet whose dependency is missing.
        kind: FacetKind,
        /// The dependency kind that was never declared.
        missing: FacetKind,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected among facet kinds: {cycle:?}")]
    CyclicDependency {
        /// The kinds participating in the detected cycle.
        cycle: Vec<FacetKind>,
    },

    /// A facet's `onInit` callback failed.
    #[error("facet `{kind}` failed to initialize: {reason}")]
    InitFailed {
        /// The facet that failed to initialize.
        kind: FacetKind,
        /// Human-readable cause.
        reason: String,
    },
}

/// Errors raised by [`crate::queue::BoundedQueue`] operations (§4.2).
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue was full and its policy is `drop-newest` or `reject`.
    #[error("queue is full (capacity {capacity})")]
    Full {
        /// The queue's configured capacity.
        capacity: usize,
    },
}

/// Errors raised while resolving a route (§4.3).
#[derive(Error, Debug)]
pub enum RouteError {
    /// No registered pattern matched the given path.
    #[error("no route matches path `{path}`")]
    NoMatch {
        /// The path that failed to match.
        path: String,
        /// Currently registered patterns, for diagnostics.
        available_routes: Vec<String>,
    },
}

/// Errors raised by the capability model's `sendProtected` path (§4.9).
#[derive(Error, Debug)]
pub enum AccessControlError {
    /// The presenting PKR has expired or its minter no longer matches.
    #[error("principal credential is not live")]
    CredentialNotLive,

    /// The path did not resolve to a known subsystem.
    #[error("no subsystem registered for scheme `{scheme}`")]
    UnknownSubsystem {
        /// The scheme segment extracted from the path.
        scheme: String,
    },

    /// The sender's RWS does not grant the scope the route requires.
    #[error("principal lacks `{scope}` capability for path `{path}`")]
    AuthFailed {
        /// The scope that was required and missing.
        scope: String,
        /// The path the send targeted.
        path: String,
    },

    /// `addReader`/`addWriter`/`removeReader`/`removeWriter` invoked by a non-owner, non-kernel principal.
    #[error("only the owner or kernel may modify this principal's grants")]
    NotOwner,
}

/// Errors raised by request/response/channel machinery (§4.8).
#[derive(Error, Debug)]
pub enum RequestError {
    /// `performRequest` timed out before any reply arrived.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The underlying send failed before a reply could ever arrive.
    #[error("request send failed: {reason}")]
    SendFailed {
        /// Human-readable cause.
        reason: String,
    },

    /// `sendCommand` was called without `options.replyTo`; a programmer error
    /// caught before anything is sent (§8 boundary behavior).
    #[error("sendCommand requires options.replyTo")]
    MissingReplyTo,

    /// `processImmediately` was invoked while the same subsystem was already
    /// executing a handler (resolves Open Question 3 in §9).
    #[error("reentrant processImmediately on subsystem `{subsystem}`")]
    Reentrancy {
        /// The subsystem whose processor was re-entered.
        subsystem: SubsystemName,
    },
}

/// Errors raised while loading or validating a [`crate::config::RuntimeConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field failed a cross-field or range validation rule.
    #[error("invalid configuration field `{field}`: {reason}")]
    Validation {
        /// The offending field's name.
        field: String,
        /// Human-readable reason the value was rejected.
        reason: String,
    },

    /// Reading a configuration file failed.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Deserializing configuration JSON failed.
    #[error("failed to parse configuration: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Aggregate error type for callers that don't need to match on which
/// subsystem of the kernel failed.
#[derive(Error, Debug)]
pub enum KernelError {
    /// See [`BuildError`].
    #[error(transparent)]
    Build(#[from] BuildError),

    /// See [`QueueError`].
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// See [`RouteError`].
    #[error(transparent)]
    Route(#[from] RouteError),

    /// See [`AccessControlError`].
    #[error(transparent)]
    AccessControl(#[from] AccessControlError),

    /// See [`RequestError`].
    #[error(transparent)]
    Request(#[from] RequestError),

    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The `type` discriminant used in the user-visible failure shape of §7:
/// `{success: false, type, message, details?}`.
#[must_use]
pub fn failure_type(err: &KernelError) -> &'static str {
    match err {
        KernelError::Build(_) => "internal",
        KernelError::Queue(_) => "queue_full",
        KernelError::Route(_) => "unroutable",
        KernelError::AccessControl(AccessControlError::AuthFailed { .. }) => "auth_failed",
        KernelError::AccessControl(_) => "auth_failed",
        KernelError::Request(RequestError::Timeout { .. }) => "timeout",
        KernelError::Request(_) => "validation",
        KernelError::Config(_) => "validation",
    }
}
