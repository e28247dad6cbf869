//! Two-level cooperative scheduling (§4.5, §4.6, §5).
//!
//! A [`global::GlobalScheduler`] grants time slices to subsystems; each
//! subsystem drains its own queue within a granted slice via its
//! [`subsystem_scheduler::SubsystemScheduler`]. The two levels share nothing
//! but the `Arc<Subsystem>` and communicate only through slice grants —
//! there is no shared mutable scheduling state between them.

pub mod global;
pub mod subsystem_scheduler;

pub use global::GlobalScheduler;
pub use subsystem_scheduler::SubsystemScheduler;
