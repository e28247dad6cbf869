//! Subsystems: the unit of facet ownership, routing, and scheduling (§3.1, §4.7).
//!
//! A `Subsystem` owns one [`FacetManager`], one [`SubsystemRouter`], one
//! [`BoundedQueue`] of pending `(message, options)` pairs, and a list of
//! children built depth-first after its own facets (§4.4). Its `processor`
//! surface (`accept`/`process_message`/`process_immediately`/`process_tick`)
//! is the entry point both scheduler types drive (§4.6, §4.7).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};

use crate::domain_types::{QueueCapacity, SchedulingPriority, SubsystemName};
use crate::error::{BuildError, RequestError};
use crate::facet::Hook;
use crate::facet_manager::FacetManager;
use crate::message::Message;
use crate::queue::{BoundedQueue, OverflowPolicy};
use crate::router::SubsystemRouter;

/// A pending `(message, send-options)` pair sitting in a subsystem's queue.
pub type QueuedMessage = (Arc<Message>, Value);

/// Per-subsystem processing counters, exposed for diagnostics and for the
/// scheduler's slice bookkeeping (§4.5, §4.6).
#[derive(Debug, Default)]
pub struct SubsystemStats {
    accepted: AtomicU64,
    queue_full: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
}

impl SubsystemStats {
    /// Number of messages successfully accepted (queued or query-resolved).
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of `accept` calls that hit the queue at capacity — whether the
    /// push was refused (`DropNewest`/`Reject`) or succeeded by evicting the
    /// head (`DropOldest`); either way, an overflow event occurred (§4.2).
    #[must_use]
    pub fn queue_full(&self) -> u64 {
        self.queue_full.load(Ordering::Relaxed)
    }

    /// Number of messages whose handler ran to a non-auth-failure result.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Number of no-route, auth-failure, or handler-exception outcomes.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Invoked whenever `process_message` observes a `{success: false}` result
/// carrying an auth-flavored `type`, so the kernel's error manager can record
/// it (§4.7, §4.9 step 5). Kept as a plug-in callback rather than a direct
/// dependency on the kernel crate module, since leaf subsystems have no
/// error manager of their own to call into.
pub type ErrorReporter = Arc<dyn Fn(&SubsystemName, &Value) + Send + Sync>;

/// A node in the subsystem tree (§3.1).
pub struct Subsystem {
    name: SubsystemName,
    priority: SchedulingPriority,
    facets: FacetManager,
    router: SubsystemRouter,
    queue: BoundedQueue<QueuedMessage>,
    children: std::sync::RwLock<Vec<Arc<Subsystem>>>,
    pending_hooks: AsyncMutex<Option<Vec<Hook>>>,
    built: AtomicBool,
    build_lock: AsyncMutex<()>,
    executing: AtomicBool,
    stats: SubsystemStats,
    error_reporter: std::sync::RwLock<Option<ErrorReporter>>,
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("name", &self.name)
            .field("built", &self.built.load(Ordering::Relaxed))
            .field("children", &self.children.read().unwrap_or_else(std::sync::PoisonError::into_inner).len())
            .finish_non_exhaustive()
    }
}

impl Subsystem {
    /// Creates an unbuilt subsystem. Hooks are supplied later via
    /// [`Subsystem::set_hooks`], then realized by [`Subsystem::build`].
    #[must_use]
    pub fn new(
        name: SubsystemName,
        priority: SchedulingPriority,
        queue_capacity: QueueCapacity,
        overflow_policy: OverflowPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            facets: FacetManager::new(),
            router: SubsystemRouter::new(),
            queue: BoundedQueue::new(queue_capacity, overflow_policy),
            children: std::sync::RwLock::new(Vec::new()),
            pending_hooks: AsyncMutex::new(Some(Vec::new())),
            built: AtomicBool::new(false),
            build_lock: AsyncMutex::new(()),
            executing: AtomicBool::new(false),
            stats: SubsystemStats::default(),
            error_reporter: std::sync::RwLock::new(None),
        })
    }

    /// This subsystem's canonical name (also its routing scheme).
    #[must_use]
    pub fn name(&self) -> &SubsystemName {
        &self.name
    }

    /// Scheduling priority used by the `priority`/`adaptive` strategies (§4.5).
    #[must_use]
    pub fn priority(&self) -> SchedulingPriority {
        self.priority
    }

    /// Read-only access to the route table, for registering handlers before
    /// (or after) build.
    #[must_use]
    pub fn router(&self) -> &SubsystemRouter {
        &self.router
    }

    /// Read-only access to the pending-message queue.
    #[must_use]
    pub fn queue(&self) -> &BoundedQueue<QueuedMessage> {
        &self.queue
    }

    /// Processing counters.
    #[must_use]
    pub fn stats(&self) -> &SubsystemStats {
        &self.stats
    }

    /// Installs the hook set this subsystem will build from. Replaces any
    /// previously set, unbuild hooks; has no effect once `build()` has run.
    pub async fn set_hooks(&self, hooks: Vec<Hook>) {
        let mut guard = self.pending_hooks.lock().await;
        *guard = Some(hooks);
    }

    /// Attaches a child, to be built depth-first after this subsystem's own
    /// facets finish initializing (§4.4).
    pub fn add_child(&self, child: Arc<Subsystem>) {
        let mut children = self.children.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        children.push(child);
    }

    /// This subsystem's children, in attachment order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Subsystem>> {
        self.children.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Installs the callback invoked when `process_message` observes an
    /// auth-flavored failure result.
    pub fn set_error_reporter(&self, reporter: ErrorReporter) {
        let mut guard = self.error_reporter.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(reporter);
    }

    /// Whether `build()` has already completed successfully.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::Relaxed)
    }

    /// Runs the transactional facet build (§4.4), then builds children
    /// depth-first. Idempotent: concurrent or repeated callers after a
    /// successful build return immediately (§8 round-trip law — build is a
    /// no-op the second time).
    #[instrument(skip(self), fields(subsystem = %self.name))]
    pub async fn build(self: &Arc<Self>) -> Result<(), BuildError> {
        let _guard = self.build_lock.lock().await;
        if self.built.load(Ordering::Relaxed) {
            debug!("build is a no-op: subsystem already built");
            return Ok(());
        }

        let hooks = {
            let mut pending = self.pending_hooks.lock().await;
            pending.take().unwrap_or_default()
        };
        self.facets.build(self.name.clone(), hooks).await?;
        self.built.store(true, Ordering::Relaxed);

        for child in self.children() {
            Box::pin(child.build()).await?;
        }
        Ok(())
    }

    /// Alias for `build()`: re-asserts the same idempotence guarantee under
    /// the name callers reaching for a "rebuild" operation expect.
    pub async fn rebuild(self: &Arc<Self>) -> Result<(), BuildError> {
        self.build().await
    }

    /// Looks up an attached facet by kind.
    #[must_use]
    pub fn find(&self, kind: &crate::domain_types::FacetKind) -> Option<Arc<dyn crate::facet::Facet>> {
        self.facets.find(kind)
    }

    /// Accepts a message for processing (§4.7 `processor.accept`).
    ///
    /// Queries are resolved synchronously and bypass the queue; everything
    /// else is enqueued. Returns `true` on success (query resolved, or
    /// enqueue accepted), `false` if the queue refused the push.
    #[instrument(skip(self, message, options), fields(subsystem = %self.name, path = %message.get_path()))]
    pub async fn accept(&self, message: Arc<Message>, options: Value) -> bool {
        if let Some(piece) = options.get("currentPiece").and_then(Value::as_str) {
            message.get_meta().mutable().set_current_piece(piece);
        }

        if message.is_query() {
            let result = self.dispatch(&message, &options).await;
            message.set_query_result(result);
            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let (accepted, overflow) = self.queue.enqueue_checked((message, options));
        if accepted {
            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        }
        if overflow {
            self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Routes, invokes, and records the outcome of a single message (§4.7
    /// `processor.processMessage`). Never panics on routing failure; a
    /// handler panic is not caught here and propagates to the caller, who is
    /// expected to record it as an error and continue (§7).
    async fn dispatch(&self, message: &Arc<Message>, options: &Value) -> Value {
        let (_scheme, relative_path) = crate::router::split_scheme(message.get_path());
        let Some(route_match) = self.router.match_path(relative_path) else {
            warn!(path = %message.get_path(), "no route matched");
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return json!({
                "success": false,
                "type": "unroutable",
                "message": format!("no route matches path `{}`", message.get_path()),
                "availableRoutes": self.router.available_routes(),
                "subsystem": self.name.to_string(),
            });
        };

        let params: std::collections::HashMap<String, String> = route_match.params.clone();
        let result = (route_match.handler)(message, &params, options);

        let is_auth_failure = result
            .get("success")
            .and_then(Value::as_bool)
            .map(|ok| !ok)
            .unwrap_or(false)
            && result.get("type").and_then(Value::as_str) == Some("auth_failed");

        if is_auth_failure {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            let reporter = self.error_reporter.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
            if let Some(reporter) = reporter {
                reporter(&self.name, &result);
            }
        } else if result.get("success").and_then(Value::as_bool).unwrap_or(true) {
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Processes one already-dequeued `(message, options)` pair. Used by a
    /// `SubsystemScheduler` slice (§4.6 step 4); sets the reentrancy guard
    /// for the duration of the handler call.
    pub async fn process_message(&self, pair: QueuedMessage) -> Value {
        self.executing.store(true, Ordering::SeqCst);
        let (message, options) = pair;
        let result = self.dispatch(&message, &options).await;
        self.executing.store(false, Ordering::SeqCst);
        result
    }

    /// Processes a raw message immediately, bypassing the queue (§4.7
    /// `processImmediately`). Fails fast with [`RequestError::Reentrancy`]
    /// if this subsystem's processor is already executing a handler on the
    /// current call stack, instead of deadlocking or serializing behind an
    /// unbounded recursive call chain (resolves Open Question 3 in §9).
    #[instrument(skip(self, message, options), fields(subsystem = %self.name))]
    pub async fn process_immediately(&self, message: Arc<Message>, options: Value) -> Result<Value, RequestError> {
        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("reentrant processImmediately detected");
            return Err(RequestError::Reentrancy {
                subsystem: self.name.clone(),
            });
        }
        let result = self.dispatch(&message, &options).await;
        self.executing.store(false, Ordering::SeqCst);
        Ok(result)
    }

    /// Dequeues and processes exactly one pending message, if any (§4.6
    /// fallback for subsystems with no scheduler attached).
    pub async fn process_tick(&self) -> Option<Value> {
        let pair = self.queue.dequeue()?;
        Some(self.process_message(pair).await)
    }
}
