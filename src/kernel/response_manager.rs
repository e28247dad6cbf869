//! Kernel service arming request timeouts and synthesizing timeout replies (§4.8).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::domain_types::MessageId;

/// Delivers a synthesized (or forwarded) response to a `replyTo` route.
/// Kept as a callback so `ResponseManager` doesn't depend on the message
/// system directly.
pub type Deliver = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Tracks in-flight requests awaiting a reply and arms a timeout for each
/// (§4.8 `ResponseManager`, §3.2 invariant 9: at most one resolution per
/// correlation id).
pub struct ResponseManager {
    pending: Arc<DashMap<MessageId, ()>>,
    deliver: Deliver,
}

impl std::fmt::Debug for ResponseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseManager")
            .field("pending_count", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ResponseManager {
    /// Creates a manager that calls `deliver(reply_to, response)` whenever a
    /// registered request times out.
    #[must_use]
    pub fn new(deliver: Deliver) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            deliver,
        }
    }

    /// Registers a waiter for `request_id` and arms a timeout. If no
    /// resolution arrives within `timeout`, a synthetic `{success: false,
    /// type: 'timeout'}` response is delivered to `reply_to`.
    #[instrument(skip(self))]
    pub fn register(&self, request_id: MessageId, reply_to: String, timeout: Duration) {
        self.pending.insert(request_id, ());
        let pending = Arc::clone(&self.pending);
        let deliver = Arc::clone(&self.deliver);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending.remove(&request_id).is_some() {
                warn!(request_id = %request_id, "request timed out; synthesizing timeout response");
                let response = json!({
                    "success": false,
                    "type": "timeout",
                    "isResponse": true,
                    "inReplyTo": request_id.to_string(),
                });
                deliver(reply_to, response);
            }
        });
    }

    /// Called when a real response matching `request_id` arrives. Returns
    /// `true` if this was the first (and only) resolution — the timeout,
    /// if it fires later, will find nothing to do.
    pub fn resolve(&self, request_id: MessageId) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    /// Whether a request is still awaiting resolution.
    #[must_use]
    pub fn is_pending(&self, request_id: MessageId) -> bool {
        self.pending.contains_key(&request_id)
    }
}
