//! The top-level cooperative scheduler that grants slices to subsystems (§4.5).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use crate::domain_types::{SchedulingPriority, SliceDurationMs, SubsystemName};
use crate::error::ConfigError;
use crate::scheduler::subsystem_scheduler::SubsystemScheduler;

/// A read-only view of one subsystem's scheduling-relevant state, handed to
/// a [`GlobalStrategy`] so strategies stay pure functions of a snapshot
/// rather than reaching back into live subsystem state themselves.
#[derive(Debug, Clone)]
pub struct SubsystemSnapshot {
    /// The subsystem's name.
    pub name: SubsystemName,
    /// Its static scheduling priority.
    pub priority: SchedulingPriority,
    /// Current queue depth.
    pub queue_size: usize,
    /// Configured queue capacity.
    pub queue_capacity: usize,
}

impl SubsystemSnapshot {
    /// Queue occupancy as a fraction of capacity, in `[0, 1]`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            0.0
        } else {
            self.queue_size as f64 / self.queue_capacity as f64
        }
    }
}

/// Shared, cross-call scheduling state handed to every strategy invocation.
pub struct StrategyInput<'a> {
    /// Snapshot of every registered subsystem, in registration order.
    pub subsystems: &'a [SubsystemSnapshot],
    /// Shared round-robin cursor (strategies that don't rotate may ignore it).
    pub round_robin_index: &'a AtomicUsize,
    /// Last time each subsystem was granted a slice.
    pub last_scheduled: &'a DashMap<SubsystemName, Instant>,
}

/// A pure selection function over a subsystem snapshot (§4.5).
pub trait GlobalStrategy: Send + Sync {
    /// Picks the index into `input.subsystems` to grant the next slice to,
    /// or `None` if no subsystem qualifies (triggers the round-robin fallback).
    fn select(&self, input: &StrategyInput<'_>) -> Option<usize>;
}

/// Advances a shared cursor, wrapping; update happens via the shared atomic
/// rather than a callback, since Rust strategies can close over it directly.
pub struct RoundRobinStrategy;

impl GlobalStrategy for RoundRobinStrategy {
    fn select(&self, input: &StrategyInput<'_>) -> Option<usize> {
        if input.subsystems.is_empty() {
            return None;
        }
        let idx = input.round_robin_index.fetch_add(1, Ordering::SeqCst) % input.subsystems.len();
        Some(idx)
    }
}

/// Picks the subsystem with the highest static priority.
pub struct PriorityStrategy;

impl GlobalStrategy for PriorityStrategy {
    fn select(&self, input: &StrategyInput<'_>) -> Option<usize> {
        input
            .subsystems
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| s.priority)
            .map(|(i, _)| i)
    }
}

/// Picks the subsystem with the largest queue.
pub struct LoadBasedStrategy;

impl GlobalStrategy for LoadBasedStrategy {
    fn select(&self, input: &StrategyInput<'_>) -> Option<usize> {
        input
            .subsystems
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| s.queue_size)
            .map(|(i, _)| i)
    }
}

/// Switches between `load-based`, `round-robin`, and `priority` by average
/// queue utilization across all subsystems (§4.5).
pub struct AdaptiveStrategy;

impl GlobalStrategy for AdaptiveStrategy {
    fn select(&self, input: &StrategyInput<'_>) -> Option<usize> {
        if input.subsystems.is_empty() {
            return None;
        }
        let avg_utilization: f64 =
            input.subsystems.iter().map(SubsystemSnapshot::utilization).sum::<f64>() / input.subsystems.len() as f64;

        if avg_utilization > 0.8 {
            LoadBasedStrategy.select(input)
        } else if avg_utilization < 0.3 {
            RoundRobinStrategy.select(input)
        } else {
            PriorityStrategy.select(input)
        }
    }
}

/// Counters recorded across `run_once` calls (§4.5 step 6).
#[derive(Debug, Default)]
pub struct GlobalSchedulerStats {
    cycles: AtomicU64,
    strategy_errors: AtomicU64,
}

impl GlobalSchedulerStats {
    /// Number of completed scheduling cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Number of times the current strategy failed to select and the
    /// scheduler fell back to `round-robin`.
    #[must_use]
    pub fn strategy_errors(&self) -> u64 {
        self.strategy_errors.load(Ordering::Relaxed)
    }
}

/// The top-level scheduler (§4.5): drives a single-threaded cooperative loop
/// that repeatedly picks one registered subsystem and grants it a time slice.
pub struct GlobalScheduler {
    schedulers: DashMap<SubsystemName, Arc<SubsystemScheduler>>,
    registration_order: RwLock<Vec<SubsystemName>>,
    strategies: DashMap<String, Arc<dyn GlobalStrategy>>,
    current_strategy: RwLock<String>,
    time_slice: SliceDurationMs,
    round_robin_index: AtomicUsize,
    last_scheduled: DashMap<SubsystemName, Instant>,
    running: AtomicBool,
    stats: GlobalSchedulerStats,
}

impl std::fmt::Debug for GlobalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalScheduler")
            .field("subsystem_count", &self.schedulers.len())
            .field("current_strategy", &*self.current_strategy.read().unwrap_or_else(std::sync::PoisonError::into_inner))
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl GlobalScheduler {
    /// Creates a scheduler with the four built-in strategies registered and
    /// `round-robin` selected, using `time_slice` as the per-grant budget.
    #[must_use]
    pub fn new(time_slice: SliceDurationMs) -> Self {
        let strategies: DashMap<String, Arc<dyn GlobalStrategy>> = DashMap::new();
        strategies.insert("round-robin".to_string(), Arc::new(RoundRobinStrategy));
        strategies.insert("priority".to_string(), Arc::new(PriorityStrategy));
        strategies.insert("load-based".to_string(), Arc::new(LoadBasedStrategy));
        strategies.insert("adaptive".to_string(), Arc::new(AdaptiveStrategy));

        Self {
            schedulers: DashMap::new(),
            registration_order: RwLock::new(Vec::new()),
            strategies,
            current_strategy: RwLock::new("round-robin".to_string()),
            time_slice,
            round_robin_index: AtomicUsize::new(0),
            last_scheduled: DashMap::new(),
            running: AtomicBool::new(false),
            stats: GlobalSchedulerStats::default(),
        }
    }

    /// Processing statistics accumulated since construction.
    #[must_use]
    pub fn stats(&self) -> &GlobalSchedulerStats {
        &self.stats
    }

    /// Registers a subsystem's scheduler so the loop can grant it slices.
    pub fn register_subsystem(&self, name: SubsystemName, scheduler: Arc<SubsystemScheduler>) {
        if self.schedulers.insert(name.clone(), scheduler).is_none() {
            self.registration_order.write().unwrap_or_else(std::sync::PoisonError::into_inner).push(name);
        }
    }

    /// Removes a subsystem from the scheduling rotation.
    pub fn unregister_subsystem(&self, name: &SubsystemName) {
        self.schedulers.remove(name);
        self.registration_order
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|n| n != name);
    }

    /// Registers (or replaces) a named strategy.
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn GlobalStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    /// Removes a named strategy. `round-robin` can never be unregistered (§4.5).
    pub fn unregister_strategy(&self, name: &str) -> Result<(), ConfigError> {
        if name == "round-robin" {
            return Err(ConfigError::Validation {
                field: "strategy".to_string(),
                reason: "round-robin cannot be unregistered".to_string(),
            });
        }
        self.strategies.remove(name);
        Ok(())
    }

    /// Switches the active strategy by name, validating it is registered.
    pub fn set_strategy(&self, name: impl Into<String>) -> Result<(), ConfigError> {
        let name = name.into();
        if !self.strategies.contains_key(&name) {
            return Err(ConfigError::Validation {
                field: "strategy".to_string(),
                reason: format!("unknown scheduling strategy `{name}`"),
            });
        }
        *self.current_strategy.write().unwrap_or_else(std::sync::PoisonError::into_inner) = name;
        Ok(())
    }

    /// The name of the currently active strategy.
    #[must_use]
    pub fn current_strategy(&self) -> String {
        self.current_strategy.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Starts the scheduling loop (`run_once` becomes a no-op otherwise).
    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    /// Stops the scheduling loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Whether the loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Runs a single scheduling cycle (§4.5 steps 1-6): picks one subsystem
    /// via the active strategy and grants it one time slice. Returns the
    /// name of the subsystem scheduled, or `None` if stopped or no
    /// subsystems are registered.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Option<SubsystemName> {
        if !self.is_running() {
            return None;
        }

        let order = self.registration_order.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if order.is_empty() {
            return None;
        }

        let entries: Vec<(SubsystemName, Arc<SubsystemScheduler>)> = order
            .iter()
            .filter_map(|name| self.schedulers.get(name).map(|s| (name.clone(), Arc::clone(&s))))
            .collect();
        if entries.is_empty() {
            return None;
        }

        let snapshots: Vec<SubsystemSnapshot> = entries
            .iter()
            .map(|(name, sched)| SubsystemSnapshot {
                name: name.clone(),
                priority: sched.subsystem_priority(),
                queue_size: sched.queue_size(),
                queue_capacity: sched.queue_capacity(),
            })
            .collect();

        let input = StrategyInput {
            subsystems: &snapshots,
            round_robin_index: &self.round_robin_index,
            last_scheduled: &self.last_scheduled,
        };

        let strategy_name = self.current_strategy();
        let strategy = self.strategies.get(&strategy_name).map(|s| Arc::clone(&s));

        let idx = match strategy.and_then(|s| s.select(&input)) {
            Some(idx) => idx,
            None => {
                warn!(strategy = %strategy_name, "strategy failed to select a subsystem; falling back to round-robin");
                self.stats.strategy_errors.fetch_add(1, Ordering::Relaxed);
                RoundRobinStrategy.select(&input)?
            }
        };

        let (name, scheduler) = &entries[idx];
        self.last_scheduled.insert(name.clone(), Instant::now());
        let result = scheduler.process(self.time_slice.as_duration()).await;
        debug!(subsystem = %name, processed = result.processed, errors = result.errors, "slice granted");
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        Some(name.clone())
    }
}
