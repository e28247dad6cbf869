//! The distinguished Kernel subsystem: capability model, profiles, channels,
//! request/response bookkeeping, and error management (§4.9–§4.11).

pub mod access_control;
pub mod channel_manager;
pub mod error_manager;
pub mod profile_registry;
pub mod response_manager;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub use access_control::{AccessControl, Pkr, PrincipalKind, Rws};
pub use channel_manager::{Channel, ChannelManager};
pub use error_manager::{ErrorFilter, ErrorManagerSubsystem, ErrorRecord, ErrorSummary, ErrorType, Severity};
pub use profile_registry::{GrantLevel, ProfileRegistry, SecurityProfile};
pub use response_manager::{Deliver, ResponseManager};

use crate::domain_types::{ErrorStoreCapacity, PublicKeyToken, QueueCapacity, SchedulingPriority, SubsystemName};
use crate::listeners::ListenersFacet;
use crate::queue::OverflowPolicy;
use crate::subsystem::Subsystem;

/// The five cross-subsystem services hosted by the Kernel subsystem (§4.9–§4.11).
#[derive(Clone)]
pub struct KernelServices {
    /// Principal registry, per-scope RWS, and `sendProtected`.
    pub access_control: Arc<AccessControl>,
    /// Named security profiles.
    pub profile_registry: Arc<ProfileRegistry>,
    /// Long-lived named reply buses.
    pub channel_manager: Arc<ChannelManager>,
    /// Request timeout bookkeeping.
    pub response_manager: Arc<ResponseManager>,
    /// Error classification and storage.
    pub error_manager: Arc<ErrorManagerSubsystem>,
    /// Broadcast point `error_manager` announces `kernel://error/event/recorded`
    /// through; other services subscribe here rather than polling the store.
    pub listeners: Arc<ListenersFacet>,
}

/// Builds the distinguished Kernel subsystem: wires `AccessControl`'s denial
/// path into the error manager, registers the error manager's kernel message
/// routes, and returns both the subsystem (ready for `build()`) and the
/// service bundle other subsystems and `MessageSystem` consult directly.
#[must_use]
pub fn build_kernel_subsystem(
    kernel_token: PublicKeyToken,
    priority: SchedulingPriority,
    queue_capacity: QueueCapacity,
    error_store_capacity: ErrorStoreCapacity,
    deliver: Deliver,
) -> (Arc<Subsystem>, KernelServices) {
    let access_control = Arc::new(AccessControl::new(kernel_token));
    let profile_registry = Arc::new(ProfileRegistry::new(Arc::clone(&access_control)));
    let channel_manager = Arc::new(ChannelManager::new());
    let response_manager = Arc::new(ResponseManager::new(deliver));
    let error_manager = ErrorManagerSubsystem::new(error_store_capacity);
    let listeners = ListenersFacet::new();
    error_manager.set_listeners(Arc::clone(&listeners) as Arc<dyn crate::facet::Facet>);

    let error_manager_for_denials = Arc::clone(&error_manager);
    access_control.set_error_recorder(Arc::new(move |failure, subsystem| {
        error_manager_for_denials.record(&failure, subsystem);
    }));

    let response_manager_for_hook = Arc::clone(&response_manager);
    access_control.set_response_hook(Arc::new(move |message, response_required| {
        let reply_to = response_required.get("replyTo").and_then(Value::as_str).unwrap_or_default();
        if reply_to.is_empty() {
            return;
        }
        let timeout_ms = response_required.get("timeout").and_then(Value::as_u64).unwrap_or(10_000);
        response_manager_for_hook.register(message.get_id(), reply_to.to_string(), Duration::from_millis(timeout_ms));
    }));

    let kernel_name = SubsystemName::try_new("kernel".to_string()).unwrap_or_else(|_| unreachable!());
    let subsystem = Subsystem::new(kernel_name, priority, queue_capacity, OverflowPolicy::Reject);
    error_manager.register_routes(subsystem.router());

    let services = KernelServices {
        access_control,
        profile_registry,
        channel_manager,
        response_manager,
        error_manager,
        listeners,
    };
    (subsystem, services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::ScopeName;
    use crate::message::{Message, MessageKind};
    use serde_json::json;

    fn cap(n: usize) -> QueueCapacity {
        QueueCapacity::try_new(n).unwrap()
    }

    fn err_cap(n: usize) -> ErrorStoreCapacity {
        ErrorStoreCapacity::try_new(n).unwrap()
    }

    fn noop_deliver() -> Deliver {
        Arc::new(|_reply_to, _response| {})
    }

    #[tokio::test]
    async fn build_kernel_subsystem_wires_error_recorder_into_denials() {
        let kernel_token = PublicKeyToken::try_new("kernel".to_string()).unwrap();
        let (_subsystem, services) = build_kernel_subsystem(
            kernel_token.clone(),
            SchedulingPriority::default(),
            cap(8),
            err_cap(8),
            noop_deliver(),
        );

        let kernel_pkr = services.access_control.get_principal(&kernel_token).unwrap();
        let msg = Arc::new(Message::new("nosuch://create", MessageKind::Command, json!({}), "test"));
        let result = services.access_control.send_protected(&kernel_pkr, msg, json!({})).await;
        assert_eq!(result["success"], json!(false));
        assert_eq!(services.error_manager.store().recent(10).len(), 1);
    }

    #[test]
    fn error_manager_routes_are_registered_on_the_kernel_subsystem() {
        let kernel_token = PublicKeyToken::try_new("kernel".to_string()).unwrap();
        let (subsystem, _services) =
            build_kernel_subsystem(kernel_token, SchedulingPriority::default(), cap(8), err_cap(8), noop_deliver());
        assert!(subsystem.router().match_path("error/query/recent").is_some());
        assert!(subsystem.router().match_path("error/query/summary").is_some());
    }

    #[tokio::test]
    async fn recorded_errors_are_broadcast_through_the_listeners_facet() {
        let kernel_token = PublicKeyToken::try_new("kernel".to_string()).unwrap();
        let (_subsystem, services) =
            build_kernel_subsystem(kernel_token.clone(), SchedulingPriority::default(), cap(8), err_cap(8), noop_deliver());

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_for_listener = Arc::clone(&seen);
        services.listeners.subscribe(Arc::new(move |msg| {
            seen_for_listener.lock().unwrap().push(msg.get_path().to_string());
        }));

        let kernel_pkr = services.access_control.get_principal(&kernel_token).unwrap();
        let msg = Arc::new(Message::new("nosuch://create", MessageKind::Command, json!({}), "test"));
        services.access_control.send_protected(&kernel_pkr, msg, json!({})).await;

        assert_eq!(seen.lock().unwrap().as_slice(), ["kernel://error/event/recorded"]);
    }

    #[test]
    fn profile_registry_shares_access_control_rws_state() {
        let kernel_token = PublicKeyToken::try_new("kernel".to_string()).unwrap();
        let (_subsystem, services) =
            build_kernel_subsystem(kernel_token, SchedulingPriority::default(), cap(8), err_cap(8), noop_deliver());

        let mut grants = std::collections::HashMap::new();
        grants.insert(ScopeName::try_new("widgets:create".to_string()).unwrap(), GrantLevel::Rw);
        services.profile_registry.create_profile("editor", grants, json!({}));

        let alice = PublicKeyToken::try_new("alice".to_string()).unwrap();
        services.profile_registry.apply_profile_to_principal("editor", &alice).unwrap();

        let rws = services.access_control.rws_for_scope(&ScopeName::try_new("widgets:create".to_string()).unwrap());
        assert!(rws.can_write(&alice));
    }
}
