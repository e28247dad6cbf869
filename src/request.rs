//! One-shot request/reply and its pending-correlation bookkeeping (§4.8, §5).
//!
//! `CommandManager` is the in-process half of request/response: it parks a
//! `oneshot` per outstanding correlation id and resolves it when a reply
//! arrives. `perform_request` is the public entrypoint a caller awaits
//! directly; its timeout race is driven by a [`TimeProvider`] rather than
//! `tokio::time` directly, so tests can run it under a [`MockTimeProvider`]
//! without `start_paused = true` bookkeeping.
//!
//! This is deliberately a different mechanism from [`crate::kernel::response_manager::ResponseManager`],
//! which arms a timeout for a *reply-to-route* delivery (a named channel, not
//! a waiting task) and synthesizes a `{type: "timeout"}` response onto that
//! route. `perform_request` is for a caller blocked on the reply in its own
//! task; `ResponseManager` is for a caller that has already returned and left
//! a channel listening.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{instrument, warn};

use crate::domain_types::{CorrelationId, RequestTimeoutMs};
use crate::error::RequestError;
use crate::kernel::access_control::{AccessControl, Pkr};
use crate::message::{Message, MessageKind};
use crate::time_provider::SharedTimeProvider;

/// Tracks outstanding one-shot requests by correlation id and resolves or
/// rejects each exactly once (§3.2 invariant 9, mirrored for the in-process
/// request path rather than the reply-to-route path).
///
/// A reply is matched solely by an explicit `correlationId` carried in the
/// response's custom metadata; a bare fallback to the response message's own
/// id is a compatibility shim this implementation does not provide (Open
/// Question 2 in §9 — resolved as "explicit id only").
#[derive(Default)]
pub struct CommandManager {
    pending: DashMap<CorrelationId, oneshot::Sender<Value>>,
}

impl std::fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandManager").field("pending_count", &self.pending.len()).finish()
    }
}

impl CommandManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a waiter for `correlation_id`, returning the receiving half.
    fn register(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        rx
    }

    /// Removes a waiter without resolving it (used when the initiating send
    /// itself fails, so no reply will ever arrive).
    fn cancel(&self, correlation_id: CorrelationId) {
        self.pending.remove(&correlation_id);
    }

    /// Delivers `response` to the waiter registered under `correlation_id`,
    /// if one is still pending. Returns `true` if this resolved a waiter.
    pub fn handle_command_reply(&self, correlation_id: CorrelationId, response: Value) -> bool {
        if let Some((_, tx)) = self.pending.remove(&correlation_id) {
            let _ = tx.send(response);
            return true;
        }
        false
    }

    /// Rejects every outstanding waiter with a synthesized `{success: false,
    /// type: "disposed"}` response and drops them, for use when the owning
    /// subsystem or `MessageSystem` is shutting down.
    pub fn dispose(&self) {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(json!({"success": false, "type": "disposed"}));
            }
        }
    }

    /// Number of requests still awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Sends `body` to `path` as a command expecting exactly one reply, and
/// awaits that reply or `timeout`, whichever comes first (§4.8 `performRequest`).
///
/// The correlation id is the outgoing message's own id (`CorrelationId::from`),
/// carried to the responder via `options.correlationId` so a downstream
/// handler can echo it back on the reply.
#[instrument(skip(access_control, command_manager, time_provider, sender, body))]
pub async fn perform_request(
    access_control: &AccessControl,
    command_manager: &CommandManager,
    time_provider: &SharedTimeProvider,
    sender: &Pkr,
    path: impl Into<String>,
    body: Value,
    timeout: RequestTimeoutMs,
) -> Result<Value, RequestError> {
    let message = Arc::new(Message::new(path, MessageKind::Command, body, sender.public_key().to_string()));
    let correlation_id = CorrelationId::from(message.get_id());
    let receiver = command_manager.register(correlation_id);

    // `responseRequired` is only ever recognized in its object form
    // (`{replyTo, timeout}`, §6); a boolean is explicitly rejected. The
    // `oneshot` waiter registered above already owns the timeout, so this
    // path has no `replyTo`/`timeout` of its own to offer and omits the key.
    let options = json!({
        "correlationId": correlation_id.to_string(),
    });
    let result = access_control.send_protected(sender, Arc::clone(&message), options).await;
    if result.get("success") != Some(&json!(true)) {
        command_manager.cancel(correlation_id);
        let reason = result.get("message").and_then(Value::as_str).unwrap_or("send was rejected").to_string();
        return Err(RequestError::SendFailed { reason });
    }

    tokio::select! {
        biased;
        response = receiver => response.map_err(|_| RequestError::SendFailed {
            reason: "waiter dropped before a reply arrived".to_string(),
        }),
        () = time_provider.sleep(timeout.as_duration()) => {
            warn!(correlation_id = %correlation_id, "request timed out before any reply arrived");
            command_manager.cancel(correlation_id);
            Err(RequestError::Timeout { timeout_ms: timeout.as_duration().as_millis() as u64 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{PublicKeyToken, QueueCapacity, SchedulingPriority};
    use crate::kernel::access_control::PrincipalKind;
    use crate::queue::OverflowPolicy;
    use crate::router::split_scheme;
    use crate::subsystem::Subsystem;
    use crate::time_provider::test_time_provider;

    fn token(s: &str) -> PublicKeyToken {
        PublicKeyToken::try_new(s.to_string()).unwrap()
    }

    fn widgets_subsystem_with_echo_route() -> Arc<Subsystem> {
        let sub = Subsystem::new(
            crate::domain_types::SubsystemName::try_new("widgets".to_string()).unwrap(),
            SchedulingPriority::default(),
            QueueCapacity::try_new(8).unwrap(),
            OverflowPolicy::Reject,
        );
        sub.router().register_route(
            "echo",
            Arc::new(|msg, _params, _opts| json!({"success": true, "echo": msg.get_body().clone()})),
            Some("widgets:echo".to_string()),
            None,
        );
        sub
    }

    #[tokio::test]
    async fn perform_request_resolves_once_handle_command_reply_is_called() {
        let access_control = AccessControl::new(token("kernel"));
        let sub = widgets_subsystem_with_echo_route();
        access_control.register_subsystem(Arc::clone(&sub));
        let friend = access_control.create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({})).unwrap();
        access_control
            .rws_for_scope(&crate::domain_types::ScopeName::try_new("widgets:echo".to_string()).unwrap())
            .add_writer(&token("kernel"), &token("kernel"), friend.public_key().clone())
            .unwrap();

        let command_manager = Arc::new(CommandManager::new());
        let cm_for_responder = Arc::clone(&command_manager);

        let responder = tokio::spawn(async move {
            loop {
                if let Some((message, _options)) = sub.queue().dequeue() {
                    let (_, relative) = split_scheme(message.get_path());
                    let route_match = sub.router().match_path(relative).unwrap();
                    let reply = (route_match.handler)(&message, &route_match.params, &json!({}));
                    let correlation_id = CorrelationId::from(message.get_id());
                    cm_for_responder.handle_command_reply(correlation_id, reply);
                    return;
                }
                tokio::task::yield_now().await;
            }
        });

        let result = perform_request(
            &access_control,
            &command_manager,
            &test_time_provider(),
            &friend,
            "widgets://echo",
            json!({"ping": true}),
            RequestTimeoutMs::try_new(5_000).unwrap(),
        )
        .await
        .unwrap();

        responder.await.unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["echo"], json!({"ping": true}));
        assert_eq!(command_manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn perform_request_times_out_when_nothing_replies() {
        let access_control = AccessControl::new(token("kernel"));
        let sub = widgets_subsystem_with_echo_route();
        access_control.register_subsystem(Arc::clone(&sub));
        let friend = access_control.create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({})).unwrap();
        access_control
            .rws_for_scope(&crate::domain_types::ScopeName::try_new("widgets:echo".to_string()).unwrap())
            .add_writer(&token("kernel"), &token("kernel"), friend.public_key().clone())
            .unwrap();

        let command_manager = CommandManager::new();
        let err = perform_request(
            &access_control,
            &command_manager,
            &test_time_provider(),
            &friend,
            "widgets://echo",
            json!({}),
            RequestTimeoutMs::try_new(1).unwrap(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RequestError::Timeout { .. }));
        assert_eq!(command_manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn perform_request_fails_fast_when_send_is_denied() {
        let access_control = AccessControl::new(token("kernel"));
        let sub = widgets_subsystem_with_echo_route();
        access_control.register_subsystem(Arc::clone(&sub));
        let friend = access_control.create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({})).unwrap();

        let command_manager = CommandManager::new();
        let err = perform_request(
            &access_control,
            &command_manager,
            &test_time_provider(),
            &friend,
            "widgets://echo",
            json!({}),
            RequestTimeoutMs::try_new(5_000).unwrap(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RequestError::SendFailed { .. }));
        assert_eq!(command_manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn dispose_rejects_every_outstanding_waiter() {
        let manager = CommandManager::new();
        let a = crate::domain_types::MessageId::generate();
        let b = crate::domain_types::MessageId::generate();
        let rx_a = manager.register(CorrelationId::from(a));
        let rx_b = manager.register(CorrelationId::from(b));
        manager.dispose();

        let reply_a = rx_a.await.unwrap();
        let reply_b = rx_b.await.unwrap();
        assert_eq!(reply_a["type"], json!("disposed"));
        assert_eq!(reply_b["type"], json!("disposed"));
    }
}
