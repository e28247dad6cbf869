//! Per-subsystem message-selection scheduling within a granted slice (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain_types::{MaxMessagesPerSlice, SchedulingPriority};
use crate::message::{Message, MessageKind};
use crate::subsystem::{QueuedMessage, Subsystem};

/// Which heuristic selects the next message to process within a slice (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SelectionStrategy {
    /// Transactional messages (those expecting a reply) first, then oldest timestamp.
    Priority,
    /// Oldest timestamp wins; plain enqueue order.
    Fifo,
    /// Cheapest estimated handler cost wins (argmin complexity).
    LoadBased,
    /// Picks `LoadBased`, `Priority`, or `Fifo` depending on queue utilization.
    Adaptive,
}

/// Outcome of one `process(slice)` call (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// The slice ran to its time/count/empty-queue limit.
    Completed,
    /// The scheduler was paused; the queue was not touched.
    Paused,
}

/// Result of one granted slice.
#[derive(Debug, Clone, Copy)]
pub struct SliceResult {
    /// Number of messages processed this slice.
    pub processed: usize,
    /// Wall-clock time left in the slice when it ended.
    pub remaining_time: Duration,
    /// Whether the slice completed normally or was skipped (paused).
    pub status: SliceStatus,
    /// Number of processed messages whose result carried `success: false`.
    pub errors: usize,
}

/// A per-subsystem message-selection scheduler (§4.6).
pub struct SubsystemScheduler {
    subsystem: Arc<Subsystem>,
    strategy: RwLock<SelectionStrategy>,
    max_messages_per_slice: MaxMessagesPerSlice,
    paused: AtomicBool,
}

impl std::fmt::Debug for SubsystemScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemScheduler")
            .field("subsystem", self.subsystem.name())
            .field("strategy", &*self.strategy.read().unwrap_or_else(std::sync::PoisonError::into_inner))
            .field("paused", &self.paused.load(Ordering::Relaxed))
            .finish()
    }
}

impl SubsystemScheduler {
    /// Creates a scheduler for `subsystem` using the given selection strategy
    /// and per-slice message cap.
    #[must_use]
    pub fn new(
        subsystem: Arc<Subsystem>,
        strategy: SelectionStrategy,
        max_messages_per_slice: MaxMessagesPerSlice,
    ) -> Arc<Self> {
        Arc::new(Self {
            subsystem,
            strategy: RwLock::new(strategy),
            max_messages_per_slice,
            paused: AtomicBool::new(false),
        })
    }

    /// The subsystem this scheduler drains.
    #[must_use]
    pub fn subsystem(&self) -> &Arc<Subsystem> {
        &self.subsystem
    }

    /// Current selection strategy.
    #[must_use]
    pub fn strategy(&self) -> SelectionStrategy {
        *self.strategy.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Changes the selection strategy used by future slices.
    pub fn set_strategy(&self, strategy: SelectionStrategy) {
        *self.strategy.write().unwrap_or_else(std::sync::PoisonError::into_inner) = strategy;
    }

    /// Pauses processing: future `process` calls return immediately without
    /// touching the queue (§4.6 paused state).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Resumes processing.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Whether this scheduler is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Current queue depth, for the `GlobalScheduler`'s `load-based`/`adaptive` strategies.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.subsystem.queue().size()
    }

    /// Configured queue capacity, used to compute utilization.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.subsystem.queue().capacity().into_inner()
    }

    /// This subsystem's static scheduling priority.
    #[must_use]
    pub fn subsystem_priority(&self) -> SchedulingPriority {
        self.subsystem.priority()
    }

    /// Drains the subsystem's queue for up to `slice`, selecting one message
    /// at a time per the configured strategy, until the slice's time or
    /// message-count budget is spent or the queue empties (§4.6).
    #[instrument(skip(self), fields(subsystem = %self.subsystem.name()))]
    pub async fn process(&self, slice: Duration) -> SliceResult {
        if self.is_paused() {
            return SliceResult {
                processed: 0,
                remaining_time: slice,
                status: SliceStatus::Paused,
                errors: 0,
            };
        }

        let start = Instant::now();
        let max = self.max_messages_per_slice.into_inner();
        let mut processed = 0usize;
        let mut errors = 0usize;

        loop {
            if start.elapsed() >= slice || processed >= max {
                break;
            }

            let snapshot = self.subsystem.queue().peek_all();
            if snapshot.is_empty() {
                break;
            }

            let Some(chosen) = select(&snapshot, self.strategy()) else {
                break;
            };

            if !self.subsystem.queue().remove(&chosen) {
                debug!("selected message already removed by a racing path; retrying");
                continue;
            }

            let result = self.subsystem.process_message(chosen).await;
            processed += 1;
            if result.get("success").and_then(Value::as_bool) == Some(false) {
                errors += 1;
            }
        }

        SliceResult {
            processed,
            remaining_time: slice.saturating_sub(start.elapsed()),
            status: SliceStatus::Completed,
            errors,
        }
    }
}

/// A message "expects a reply" (and so is treated as higher priority by the
/// `priority` strategy) if it's a `Command` or `Response` — an `Event` is
/// fire-and-forget and yields to anything still awaiting an answer.
fn is_transactional(message: &Message) -> bool {
    matches!(message.get_meta().kind(), MessageKind::Command | MessageKind::Response)
}

/// Default complexity estimator: a body-fanout heuristic. Cheaper messages
/// (fewer object keys / array elements at the top level) sort first under
/// `load-based` selection.
fn complexity(message: &Message) -> usize {
    match message.get_body() {
        Value::Object(map) => map.len().max(1),
        Value::Array(items) => items.len().max(1),
        Value::Null => 0,
        _ => 1,
    }
}

fn select(candidates: &[QueuedMessage], strategy: SelectionStrategy) -> Option<QueuedMessage> {
    if candidates.is_empty() {
        return None;
    }
    match strategy {
        SelectionStrategy::Fifo => candidates
            .iter()
            .min_by_key(|(msg, _)| msg.get_meta().timestamp())
            .cloned(),
        SelectionStrategy::Priority => candidates
            .iter()
            .min_by_key(|(msg, _)| (!is_transactional(msg), msg.get_meta().timestamp()))
            .cloned(),
        SelectionStrategy::LoadBased => candidates
            .iter()
            .min_by_key(|(msg, _)| complexity(msg))
            .cloned(),
        SelectionStrategy::Adaptive => {
            // Utilization proxy: how big the snapshot is relative to an
            // arbitrary "busy" reference count, matching the GlobalScheduler's
            // 0.8/0.3 thresholds in spirit rather than sharing its capacity.
            let utilization = candidates.len() as f64 / 100.0;
            let effective = if utilization > 0.8 {
                SelectionStrategy::LoadBased
            } else if utilization < 0.3 {
                SelectionStrategy::Fifo
            } else {
                SelectionStrategy::Priority
            };
            select(candidates, effective)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{QueueCapacity, SubsystemName};
    use crate::queue::OverflowPolicy;
    use serde_json::json;

    fn name(s: &str) -> SubsystemName {
        SubsystemName::try_new(s.to_string()).unwrap()
    }

    fn cap(n: usize) -> QueueCapacity {
        QueueCapacity::try_new(n).unwrap()
    }

    fn subsystem() -> Arc<Subsystem> {
        Subsystem::new(name("widgets"), SchedulingPriority::default(), cap(10), OverflowPolicy::Reject)
    }

    #[tokio::test]
    async fn fifo_processes_in_enqueue_order() {
        let sub = subsystem();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        sub.router().register_route(
            "widgets/step",
            Arc::new(move |msg, _params, _opts| {
                order_clone.lock().unwrap().push(msg.get_body()["n"].as_i64().unwrap());
                json!({"success": true})
            }),
            None,
            None,
        );
        for n in 0..3 {
            let msg = Arc::new(Message::new("widgets/step", MessageKind::Event, json!({"n": n}), "test"));
            sub.accept(msg, json!({})).await;
        }

        let scheduler = SubsystemScheduler::new(Arc::clone(&sub), SelectionStrategy::Fifo, MaxMessagesPerSlice::try_new(10).unwrap());
        let result = scheduler.process(Duration::from_secs(1)).await;
        assert_eq!(result.processed, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn max_messages_per_slice_bounds_a_single_slice() {
        let sub = subsystem();
        sub.router().register_route(
            "widgets/step",
            Arc::new(|_msg, _params, _opts| json!({"success": true})),
            None,
            None,
        );
        for n in 0..5 {
            let msg = Arc::new(Message::new("widgets/step", MessageKind::Event, json!({"n": n}), "test"));
            sub.accept(msg, json!({})).await;
        }

        let scheduler = SubsystemScheduler::new(Arc::clone(&sub), SelectionStrategy::Fifo, MaxMessagesPerSlice::try_new(2).unwrap());
        let result = scheduler.process(Duration::from_secs(1)).await;
        assert_eq!(result.processed, 2);
        assert_eq!(sub.queue().size(), 3);
    }

    #[tokio::test]
    async fn paused_scheduler_does_not_touch_the_queue() {
        let sub = subsystem();
        sub.router().register_route(
            "widgets/step",
            Arc::new(|_msg, _params, _opts| json!({"success": true})),
            None,
            None,
        );
        let msg = Arc::new(Message::new("widgets/step", MessageKind::Event, json!({}), "test"));
        sub.accept(msg, json!({})).await;

        let scheduler = SubsystemScheduler::new(Arc::clone(&sub), SelectionStrategy::Fifo, MaxMessagesPerSlice::try_new(10).unwrap());
        scheduler.pause();
        let result = scheduler.process(Duration::from_secs(1)).await;
        assert_eq!(result.processed, 0);
        assert_eq!(result.status, SliceStatus::Paused);
        assert_eq!(sub.queue().size(), 1);
    }

    #[tokio::test]
    async fn priority_strategy_prefers_transactional_messages() {
        let sub = subsystem();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        sub.router().register_route(
            "widgets/step",
            Arc::new(move |msg, _params, _opts| {
                order_clone.lock().unwrap().push(msg.get_meta().kind());
                json!({"success": true})
            }),
            None,
            None,
        );
        let event = Arc::new(Message::new("widgets/step", MessageKind::Event, json!({}), "test"));
        sub.accept(event, json!({})).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        let command = Arc::new(Message::new("widgets/step", MessageKind::Command, json!({}), "test"));
        sub.accept(command, json!({})).await;

        let scheduler = SubsystemScheduler::new(Arc::clone(&sub), SelectionStrategy::Priority, MaxMessagesPerSlice::try_new(10).unwrap());
        scheduler.process(Duration::from_secs(1)).await;
        assert_eq!(order.lock().unwrap()[0], MessageKind::Command);
    }
}
