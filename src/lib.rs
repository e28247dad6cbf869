//! An in-process, hierarchical, message-driven actor-like runtime kernel.
//!
//! A [`message_system::MessageSystem`] owns a tree of [`subsystem::Subsystem`]s rooted at a
//! distinguished Kernel subsystem. Each subsystem is assembled from [`facet::Hook`]s that
//! produce [`facet::Facet`]s managed by a [`facet_manager::FacetManager`]; messages travel
//! between subsystems through a [`router::SubsystemRouter`] pattern table and a
//! [`queue::BoundedQueue`], drained cooperatively by a two-level [`scheduler`].
//!
//! The [`kernel`] module hosts the cross-subsystem services every deployment shares:
//! capability-based access control, named reply channels, profile-based grant bundles, and
//! bounded classified error storage. [`request`] layers a one-shot await-a-single-reply
//! convenience on top of the protected send path.

pub mod config;
pub mod domain_types;
pub mod error;
pub mod facet;
pub mod facet_manager;
pub mod kernel;
pub mod listeners;
pub mod message;
pub mod message_system;
pub mod observability;
pub mod queue;
pub mod request;
pub mod router;
pub mod scheduler;
pub mod subsystem;
pub mod time_provider;

pub use config::RuntimeConfig;
pub use error::{failure_type, KernelError};
pub use facet::{Facet, FacetContext, Hook};
pub use message::{Message, MessageKind, MessageMetadata};
pub use message_system::MessageSystem;
pub use observability::{init_tracing, TracingFormat};
pub use subsystem::Subsystem;
