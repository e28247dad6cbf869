//! Message and metadata types (§3.1, §4.1).
//!
//! `Message` is a keyed record; `MessageMetadata` splits into a `Fixed` part
//! (immutable after construction) and a `Mutable` part (write-once per field).
//! This mirrors the "frozen-but-stampable metadata" design note in §9: rather
//! than one record with ad hoc mutability, the two slots make "what can change"
//! a type-level fact instead of a convention callers have to remember.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain_types::{MessageId, TraceId};

/// The declared kind of a message, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MessageKind {
    /// A one-way instruction that enqueues normally.
    Command,
    /// A synchronous, queue-bypassing read (§4.7).
    Query,
    /// A one-way notification.
    Event,
    /// A reply to an earlier request or command.
    Response,
}

/// The immutable half of [`MessageMetadata`]: fixed at construction, never changes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Fixed {
    id: MessageId,
    path: String,
    timestamp: DateTime<Utc>,
    trace_id: TraceId,
    kind: MessageKind,
    source: String,
    custom: HashMap<String, Value>,
}

/// A field in the mutable metadata slice that can be written at most once.
///
/// `OnceLock` gives us "set at most once, readable many times" for free instead
/// of hand-rolling a checked-write flag around a `RefCell`.
#[derive(Debug, Default)]
struct WriteOnce<T>(OnceLock<T>);

impl<T: Clone> WriteOnce<T> {
    fn new() -> Self {
        Self(OnceLock::new())
    }

    /// Returns `Err(())` if a value was already present — writing twice is a
    /// programmer error per §4.1.
    fn set(&self, value: T) -> Result<(), ()> {
        self.0.set(value).map_err(|_| ())
    }

    fn get(&self) -> Option<&T> {
        self.0.get()
    }
}

/// The mutable half of [`MessageMetadata`]: each field may be set at most once,
/// by a single writer, and is never read before being set (§3.2 invariant 2).
#[derive(Debug, Default)]
pub struct Mutable {
    current_piece: WriteOnce<String>,
    query_result: WriteOnce<Value>,
    custom_mutable: Mutex<HashMap<String, Value>>,
}

impl Mutable {
    fn new() -> Self {
        Self {
            current_piece: WriteOnce::new(),
            query_result: WriteOnce::new(),
            custom_mutable: Mutex::new(HashMap::new()),
        }
    }

    /// Stamps the routing breadcrumb. Returns `false` if already set.
    pub fn set_current_piece(&self, piece: impl Into<String>) -> bool {
        self.current_piece.set(piece.into()).is_ok()
    }

    /// Returns the routing breadcrumb, if stamped.
    #[must_use]
    pub fn current_piece(&self) -> Option<&str> {
        self.current_piece.get().map(String::as_str)
    }

    /// One-shot write of the query result (§4.1, §8 invariant 10). Returns
    /// `false` if a result was already stored — a programmer error.
    pub fn set_query_result(&self, result: Value) -> bool {
        self.query_result.set(result).is_ok()
    }

    /// Returns the query result, if one has been set.
    #[must_use]
    pub fn query_result(&self) -> Option<&Value> {
        self.query_result.get()
    }

    /// Sets a custom mutable field exactly once. Returns `false` on a second write.
    pub fn set_custom(&self, key: impl Into<String>, value: Value) -> bool {
        let mut guard = self.custom_mutable.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = key.into();
        if guard.contains_key(&key) {
            return false;
        }
        guard.insert(key, value);
        true
    }

    /// Reads a custom mutable field.
    #[must_use]
    pub fn get_custom(&self, key: &str) -> Option<Value> {
        let guard = self.custom_mutable.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(key).cloned()
    }
}

/// Structured sidecar attached to every [`Message`] (§3.1, §4.1).
#[derive(Debug)]
pub struct MessageMetadata {
    fixed: Fixed,
    mutable: Mutable,
}

impl MessageMetadata {
    /// Builds metadata with fixed fields frozen at construction.
    #[must_use]
    pub fn new(
        id: MessageId,
        path: impl Into<String>,
        kind: MessageKind,
        source: impl Into<String>,
        trace_id: TraceId,
        custom: HashMap<String, Value>,
    ) -> Self {
        Self {
            fixed: Fixed {
                id,
                path: path.into(),
                timestamp: Utc::now(),
                trace_id,
                kind,
                source: source.into(),
                custom,
            },
            mutable: Mutable::new(),
        }
    }

    /// The message id (fixed).
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.fixed.id
    }

    /// The route path (fixed).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.fixed.path
    }

    /// Creation timestamp (fixed).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.fixed.timestamp
    }

    /// Distributed tracing id (fixed).
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.fixed.trace_id
    }

    /// Declared kind (fixed).
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.fixed.kind
    }

    /// Declared source (fixed).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.fixed.source
    }

    /// A custom field set at construction (fixed, read-only).
    #[must_use]
    pub fn custom(&self, key: &str) -> Option<&Value> {
        self.fixed.custom.get(key)
    }

    /// The write-once-per-field mutable slice.
    #[must_use]
    pub fn mutable(&self) -> &Mutable {
        &self.mutable
    }
}

/// An immutable-keyed routing unit (§3.1).
///
/// `id`, `path`, `meta` are frozen at creation; `body` is treated as frozen
/// alongside them even though nothing prevents interior mutability inside a
/// user-supplied `Value` — handlers are expected not to mutate a message's
/// body once it has left the factory.
#[derive(Debug)]
pub struct Message {
    body: Value,
    meta: MessageMetadata,
}

impl Message {
    /// Constructs a new message, assigning a fresh id and stamping the current
    /// time and a generated trace id (§3.2 invariant 1).
    #[must_use]
    pub fn new(path: impl Into<String>, kind: MessageKind, body: Value, source: impl Into<String>) -> Self {
        let id = MessageId::generate();
        let meta = MessageMetadata::new(id, path, kind, source, TraceId::generate(), HashMap::new());
        Self { body, meta }
    }

    /// Constructs a message with an explicit trace id and custom fields, for
    /// callers threading trace context across a send.
    #[must_use]
    pub fn with_metadata(
        path: impl Into<String>,
        kind: MessageKind,
        body: Value,
        source: impl Into<String>,
        trace_id: TraceId,
        custom: HashMap<String, Value>,
    ) -> Self {
        let id = MessageId::generate();
        let meta = MessageMetadata::new(id, path, kind, source, trace_id, custom);
        Self { body, meta }
    }

    /// The message's unique id.
    #[must_use]
    pub fn get_id(&self) -> MessageId {
        self.meta.id()
    }

    /// The message's route path.
    #[must_use]
    pub fn get_path(&self) -> &str {
        self.meta.path()
    }

    /// The message's opaque body.
    #[must_use]
    pub fn get_body(&self) -> &Value {
        &self.body
    }

    /// The message's metadata sidecar.
    #[must_use]
    pub fn get_meta(&self) -> &MessageMetadata {
        &self.meta
    }

    /// Whether this message is a synchronous, queue-bypassing query (§4.7).
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self.meta.kind(), MessageKind::Query)
    }

    /// Whether this message is a reply to an earlier request or command.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self.meta.kind(), MessageKind::Response)
    }

    /// One-shot write of the query result. Returns `false` if already set —
    /// the caller should treat that as a programmer error (§4.1).
    pub fn set_query_result(&self, result: Value) -> bool {
        self.meta.mutable().set_query_result(result)
    }

    /// The query result, once set.
    #[must_use]
    pub fn get_query_result(&self) -> Option<&Value> {
        self.meta.mutable().query_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_message_has_unique_nonempty_id() {
        let a = Message::new("workspace://create", MessageKind::Command, json!({}), "test");
        let b = Message::new("workspace://create", MessageKind::Command, json!({}), "test");
        assert_ne!(a.get_id(), b.get_id());
        assert!(!a.get_id().to_string().is_empty());
    }

    #[test]
    fn query_result_is_write_once() {
        let msg = Message::new("query/ping", MessageKind::Query, json!({}), "test");
        assert!(msg.set_query_result(json!({"success": true})));
        assert!(!msg.set_query_result(json!({"success": false})));
        assert_eq!(msg.get_query_result(), Some(&json!({"success": true})));
    }

    #[test]
    fn mutable_current_piece_is_write_once() {
        let msg = Message::new("a://b", MessageKind::Event, json!(null), "test");
        assert!(msg.get_meta().mutable().set_current_piece("hop-1"));
        assert!(!msg.get_meta().mutable().set_current_piece("hop-2"));
        assert_eq!(msg.get_meta().mutable().current_piece(), Some("hop-1"));
    }

    #[test]
    fn custom_mutable_field_is_write_once_per_key() {
        let meta = MessageMetadata::new(
            MessageId::generate(),
            "a://b",
            MessageKind::Command,
            "test",
            TraceId::generate(),
            HashMap::new(),
        );
        assert!(meta.mutable().set_custom("retries", json!(1)));
        assert!(!meta.mutable().set_custom("retries", json!(2)));
        assert_eq!(meta.mutable().get_custom("retries"), Some(json!(1)));
    }

    #[test]
    fn is_query_and_is_response_reflect_declared_kind() {
        let query = Message::new("query/ping", MessageKind::Query, json!(null), "test");
        assert!(query.is_query());
        assert!(!query.is_response());

        let response = Message::new("a://b", MessageKind::Response, json!(null), "test");
        assert!(response.is_response());
        assert!(!response.is_query());
    }
}
