//! The listeners facet: a fan-out broadcast point any subsystem can attach,
//! used by services that need to announce an event rather than reply to one
//! (§4.4, §4.11 `ErrorManagerSubsystem`).
//!
//! Grounded on the same pluggable-callback idiom [`crate::kernel::access_control::AccessControl`]
//! uses for its denial-recording hook: subscribers register a closure, the
//! facet invokes every registered closure with a constructed [`Message`] and
//! never waits on or inspects a return value.

use std::any::Any;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain_types::{FacetKind, SourceId};
use crate::error::BuildError;
use crate::facet::{Facet, FacetContext, Hook, HookFn};
use crate::message::{Message, MessageKind};

/// A subscriber callback, invoked once per [`ListenersFacet::emit`] call.
pub type Listener = Arc<dyn Fn(Arc<Message>) + Send + Sync>;

/// Registry of subscriber callbacks, attached to a subsystem as
/// `subsystem["listeners"]` so any other facet on the same subsystem can
/// resolve it via [`FacetContext::find`] and emit events through it.
pub struct ListenersFacet {
    listeners: RwLock<Vec<Listener>>,
}

impl ListenersFacet {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Registers a listener. It stays registered until the facet itself is dropped.
    pub fn subscribe(&self, listener: Listener) {
        self.listeners.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(listener);
    }

    /// Current number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Builds a [`MessageKind::Event`] message at `path` with `body`, and
    /// invokes every registered listener with it. Best-effort: a panicking
    /// listener would poison nothing else here, but this does not catch
    /// panics, matching the teacher's other fire-and-forget hooks.
    pub fn emit(&self, path: impl Into<String>, body: Value) {
        let message = Arc::new(Message::new(path, MessageKind::Event, body, "kernel"));
        let listeners = self.listeners.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(Arc::clone(&message));
        }
    }
}

impl std::fmt::Debug for ListenersFacet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenersFacet").field("listener_count", &self.listener_count()).finish()
    }
}

#[async_trait]
impl Facet for ListenersFacet {
    fn kind(&self) -> FacetKind {
        FacetKind::try_new("listeners".to_string()).unwrap_or_else(|_| unreachable!())
    }

    fn emit_event(&self, path: &str, body: Value) {
        self.emit(path.to_string(), body);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds the default `listeners` hook, attached as `subsystem["listeners"]`.
#[must_use]
pub fn listeners_hook() -> Hook {
    let factory: HookFn = Arc::new(|_ctx: &FacetContext| Ok(ListenersFacet::new() as Arc<dyn Facet>));
    Hook::new(
        FacetKind::try_new("listeners".to_string()).unwrap(),
        Vec::new(),
        false,
        true,
        SourceId::try_new("listeners".to_string()).unwrap(),
        factory,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_invokes_every_registered_listener() {
        let facet = ListenersFacet::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let seen_a_for_closure = Arc::clone(&seen_a);
        let seen_b_for_closure = Arc::clone(&seen_b);
        facet.subscribe(Arc::new(move |msg| seen_a_for_closure.lock().unwrap().push(msg.get_path().to_string())));
        facet.subscribe(Arc::new(move |msg| seen_b_for_closure.lock().unwrap().push(msg.get_path().to_string())));

        facet.emit("kernel://error/event/recorded", serde_json::json!({"id": "abc"}));

        assert_eq!(seen_a.lock().unwrap().as_slice(), ["kernel://error/event/recorded"]);
        assert_eq!(seen_b.lock().unwrap().as_slice(), ["kernel://error/event/recorded"]);
    }

    #[test]
    fn emit_with_no_listeners_is_a_no_op() {
        let facet = ListenersFacet::new();
        facet.emit("kernel://error/event/recorded", serde_json::json!({}));
        assert_eq!(facet.listener_count(), 0);
    }
}
