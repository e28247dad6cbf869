//! Typed, validated configuration tree for a `MessageSystem` (§1.1, §6).
//!
//! Mirrors the nested JSON map of §6 field-for-field, so the external shape
//! (`{queue: {...}, scheduler: {...}, ...}`) deserializes directly into this
//! tree; the presets and builder below are additive conveniences over it, not
//! a replacement for it.

use crate::domain_types::{
    ErrorStoreCapacity, MaxMessagesPerSlice, QueueCapacity, RequestTimeoutMs, SchedulingPriority, SliceDurationMs,
};
use crate::error::ConfigError;
use crate::observability::TracingFormat;
use crate::queue::OverflowPolicy;
use crate::scheduler::subsystem_scheduler::SelectionStrategy;

/// `queue` section of the configuration tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// Per-subsystem queue capacity.
    pub capacity: QueueCapacity,
    /// Overflow behavior once `capacity` is reached.
    pub policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: QueueCapacity::default(),
            policy: OverflowPolicy::Reject,
        }
    }
}

/// `scheduler` section: a single subsystem's scheduling behavior.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubsystemSchedulerConfig {
    /// Scheduling weight consulted by `priority`/`adaptive` strategies.
    pub priority: SchedulingPriority,
    /// Message-selection strategy within a granted slice.
    pub strategy: SelectionStrategy,
    /// Upper bound on messages drained per granted slice.
    pub max_messages_per_slice: MaxMessagesPerSlice,
}

impl Default for SubsystemSchedulerConfig {
    fn default() -> Self {
        Self {
            priority: SchedulingPriority::default(),
            strategy: SelectionStrategy::Fifo,
            max_messages_per_slice: MaxMessagesPerSlice::default(),
        }
    }
}

/// `globalScheduler` section.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GlobalSchedulerConfig {
    /// Wall-clock budget granted to each subsystem per cycle.
    pub time_slice: SliceDurationMs,
    /// Subsystem-selection strategy, one of the four built-ins registered by
    /// [`crate::scheduler::global::GlobalScheduler::new`].
    pub strategy: String,
}

impl Default for GlobalSchedulerConfig {
    fn default() -> Self {
        Self {
            time_slice: SliceDurationMs::default(),
            strategy: "round-robin".to_string(),
        }
    }
}

/// `errorManager` section.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorManagerConfig {
    /// Ring capacity of the kernel's `BoundedErrorStore`.
    pub capacity: ErrorStoreCapacity,
}

impl Default for ErrorManagerConfig {
    fn default() -> Self {
        Self {
            capacity: ErrorStoreCapacity::default(),
        }
    }
}

/// `request` section: defaults for `performRequest`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RequestConfig {
    /// Timeout applied to a one-shot request when the caller doesn't override it.
    pub default_timeout: RequestTimeoutMs,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_timeout: RequestTimeoutMs::default(),
        }
    }
}

/// Logging verbosity/format knobs, consumed by a binary calling
/// [`crate::observability::init_tracing`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    /// Output shape.
    pub format: SerializableTracingFormat,
}

/// Serializable mirror of [`TracingFormat`] (kept distinct so the tracing
/// module itself stays free of a `serde` dependency it otherwise wouldn't need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SerializableTracingFormat {
    /// See [`TracingFormat::Pretty`].
    Pretty,
    /// See [`TracingFormat::Json`].
    Json,
}

impl From<SerializableTracingFormat> for TracingFormat {
    fn from(format: SerializableTracingFormat) -> Self {
        match format {
            SerializableTracingFormat::Pretty => Self::Pretty,
            SerializableTracingFormat::Json => Self::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: SerializableTracingFormat::Pretty,
        }
    }
}

/// The full, typed configuration tree passed to `MessageSystem` bootstrap
/// (§1.1, §6). Field-for-field mirror of the external nested map; deserialize
/// directly from that map, build with a preset, or assemble via the fluent
/// `with_*` methods.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Verbose per-message tracing in addition to the levels §1.1 always emits.
    pub debug: bool,
    /// Default per-subsystem queue behavior.
    pub queue: QueueConfig,
    /// Default per-subsystem scheduler behavior.
    pub scheduler: SubsystemSchedulerConfig,
    /// Cross-subsystem scheduling arbiter behavior.
    pub global_scheduler: GlobalSchedulerConfig,
    /// Kernel error store sizing.
    pub error_manager: ErrorManagerConfig,
    /// One-shot request defaults.
    pub request: RequestConfig,
    /// Tracing subscriber defaults for bootstrap binaries.
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Small queues, short slices, verbose tracing — suited to interactive
    /// iteration (§1.1).
    #[must_use]
    pub fn development() -> Self {
        Self {
            debug: true,
            queue: QueueConfig {
                capacity: QueueCapacity::try_new(64).unwrap_or_default(),
                policy: OverflowPolicy::Reject,
            },
            scheduler: SubsystemSchedulerConfig {
                max_messages_per_slice: MaxMessagesPerSlice::try_new(10).unwrap_or_default(),
                ..SubsystemSchedulerConfig::default()
            },
            global_scheduler: GlobalSchedulerConfig {
                time_slice: SliceDurationMs::try_new(50).unwrap_or_default(),
                ..GlobalSchedulerConfig::default()
            },
            error_manager: ErrorManagerConfig {
                capacity: ErrorStoreCapacity::try_new(100).unwrap_or_default(),
            },
            request: RequestConfig::default(),
            logging: LoggingConfig {
                format: SerializableTracingFormat::Pretty,
            },
        }
    }

    /// Larger queues, longer slices, sampled tracing, stricter validation —
    /// suited to a long-running deployment (§1.1).
    #[must_use]
    pub fn production() -> Self {
        Self {
            debug: false,
            queue: QueueConfig {
                capacity: QueueCapacity::try_new(10_000).unwrap_or_default(),
                policy: OverflowPolicy::Reject,
            },
            scheduler: SubsystemSchedulerConfig {
                max_messages_per_slice: MaxMessagesPerSlice::try_new(500).unwrap_or_default(),
                strategy: SelectionStrategy::Adaptive,
                ..SubsystemSchedulerConfig::default()
            },
            global_scheduler: GlobalSchedulerConfig {
                time_slice: SliceDurationMs::try_new(2_000).unwrap_or_default(),
                strategy: "adaptive".to_string(),
            },
            error_manager: ErrorManagerConfig {
                capacity: ErrorStoreCapacity::try_new(10_000).unwrap_or_default(),
            },
            request: RequestConfig::default(),
            logging: LoggingConfig {
                format: SerializableTracingFormat::Json,
            },
        }
    }

    /// Minimal resource footprint, deterministic single-slice-sized queues —
    /// suited to unit tests (§1.1).
    #[must_use]
    pub fn testing() -> Self {
        Self {
            debug: true,
            queue: QueueConfig {
                capacity: QueueCapacity::try_new(4).unwrap_or_default(),
                policy: OverflowPolicy::Reject,
            },
            scheduler: SubsystemSchedulerConfig {
                max_messages_per_slice: MaxMessagesPerSlice::try_new(4).unwrap_or_default(),
                strategy: SelectionStrategy::Fifo,
                ..SubsystemSchedulerConfig::default()
            },
            global_scheduler: GlobalSchedulerConfig {
                time_slice: SliceDurationMs::try_new(10).unwrap_or_default(),
                strategy: "round-robin".to_string(),
            },
            error_manager: ErrorManagerConfig {
                capacity: ErrorStoreCapacity::try_new(16).unwrap_or_default(),
            },
            request: RequestConfig {
                default_timeout: RequestTimeoutMs::try_new(50).unwrap_or_default(),
            },
            logging: LoggingConfig {
                format: SerializableTracingFormat::Pretty,
            },
        }
    }

    /// Overrides the debug flag (fluent builder step).
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Overrides the default queue capacity (fluent builder step).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.queue.capacity = capacity;
        self
    }

    /// Overrides the global scheduler's time slice (fluent builder step).
    #[must_use]
    pub fn with_time_slice(mut self, time_slice: SliceDurationMs) -> Self {
        self.global_scheduler.time_slice = time_slice;
        self
    }

    /// Rejects cross-field inconsistencies that per-field `nutype` validation
    /// can't catch on its own (§1.1): a scheduler slice whose
    /// `max_messages_per_slice` exceeds the queue it drains from can never
    /// make progress beyond one slice, and a global time slice of zero-ish
    /// duration paired with a nonzero per-subsystem minimum tick would starve
    /// every subsystem equally forever (indistinguishable from a bug).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_messages_per_slice.into_inner() > self.queue.capacity.into_inner() {
            return Err(ConfigError::Validation {
                field: "scheduler.max_messages_per_slice".to_string(),
                reason: format!(
                    "{} exceeds queue capacity {}; a slice can never drain more than the queue can ever hold",
                    self.scheduler.max_messages_per_slice.into_inner(),
                    self.queue.capacity.into_inner()
                ),
            });
        }
        if self.global_scheduler.time_slice.into_inner() < 1 {
            return Err(ConfigError::Validation {
                field: "global_scheduler.time_slice".to_string(),
                reason: "time slice must be at least 1ms".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes to the external nested-map JSON shape of §6.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialization)
    }

    /// Deserializes from the external nested-map JSON shape of §6.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Serialization)
    }
}
