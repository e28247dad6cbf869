//! The runtime root: owns the Kernel subsystem, the scheduler, and the
//! registry of application subsystems attached beneath it (§3.1, §6).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::config::RuntimeConfig;
use crate::domain_types::{CorrelationId, PublicKeyToken, SubsystemName};
use crate::error::{BuildError, KernelError, RequestError};
use crate::facet::Hook;
use crate::kernel::access_control::{AccessControl, Pkr, PrincipalKind};
use crate::kernel::{build_kernel_subsystem, Deliver, KernelServices};
use crate::message::{Message, MessageKind};
use crate::request::{self, CommandManager};
use crate::scheduler::global::GlobalScheduler;
use crate::scheduler::subsystem_scheduler::{SelectionStrategy, SubsystemScheduler};
use crate::subsystem::Subsystem;
use crate::time_provider::{production_time_provider, SharedTimeProvider};

/// The root of a runtime instance: the Kernel subsystem, every registered
/// application subsystem, the two-level scheduler, and the one-shot request
/// bookkeeping that sits above `AccessControl`.
pub struct MessageSystem {
    config: RuntimeConfig,
    kernel_subsystem: Arc<Subsystem>,
    kernel: KernelServices,
    subsystems: DashMap<SubsystemName, Arc<Subsystem>>,
    global_scheduler: Arc<GlobalScheduler>,
    command_manager: Arc<CommandManager>,
    time_provider: SharedTimeProvider,
}

impl std::fmt::Debug for MessageSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSystem")
            .field("subsystem_count", &self.subsystems.len())
            .field("current_strategy", &self.global_scheduler.current_strategy())
            .finish_non_exhaustive()
    }
}

impl MessageSystem {
    /// Validates `config`, then assembles the Kernel subsystem, the
    /// `GlobalScheduler`, and a `CommandManager` for in-process requests,
    /// using the real wall-clock time provider.
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>, KernelError> {
        Self::new_with_time_provider(config, production_time_provider())
    }

    /// Same as [`MessageSystem::new`], but with an explicit time provider —
    /// tests pass [`crate::time_provider::test_time_provider`] so
    /// `perform_request` timeouts resolve without real delay.
    pub fn new_with_time_provider(config: RuntimeConfig, time_provider: SharedTimeProvider) -> Result<Arc<Self>, KernelError> {
        config.validate().map_err(KernelError::Config)?;

        let kernel_token = PublicKeyToken::try_new("kernel".to_string())
            .unwrap_or_else(|_| unreachable!("\"kernel\" always satisfies PublicKeyToken's validation"));

        let access_control_cell: Arc<OnceCell<Arc<AccessControl>>> = Arc::new(OnceCell::new());
        let deliver = forwarding_deliver(Arc::clone(&access_control_cell));

        let (kernel_subsystem, kernel) = build_kernel_subsystem(
            kernel_token,
            config.scheduler.priority,
            config.queue.capacity,
            config.error_manager.capacity,
            deliver,
        );
        access_control_cell
            .set(Arc::clone(&kernel.access_control))
            .unwrap_or_else(|_| unreachable!("set once, immediately after construction"));

        let global_scheduler = Arc::new(GlobalScheduler::new(config.global_scheduler.time_slice));
        global_scheduler.register_subsystem(
            kernel_subsystem.name().clone(),
            SubsystemScheduler::new(
                Arc::clone(&kernel_subsystem),
                SelectionStrategy::Priority,
                config.scheduler.max_messages_per_slice,
            ),
        );
        if global_scheduler.set_strategy(config.global_scheduler.strategy.clone()).is_err() {
            global_scheduler.set_strategy("round-robin").expect("round-robin is always registered");
        }

        kernel.access_control.register_subsystem(Arc::clone(&kernel_subsystem));

        Ok(Arc::new(Self {
            config,
            kernel_subsystem,
            kernel,
            subsystems: DashMap::new(),
            global_scheduler,
            command_manager: Arc::new(CommandManager::new()),
            time_provider,
        }))
    }

    /// The cross-subsystem kernel services (`AccessControl`, `ProfileRegistry`, …).
    #[must_use]
    pub fn kernel(&self) -> &KernelServices {
        &self.kernel
    }

    /// The resolved configuration this system was constructed from.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Attaches a new application subsystem with `hooks`, registers it with
    /// `AccessControl` (so `sendProtected` can route to its scheme) and the
    /// `GlobalScheduler` (so it receives slices), then builds it. Routes are
    /// registered directly against the returned subsystem's router by the
    /// caller, the same way the kernel subsystem registers its own.
    #[instrument(skip(self, hooks))]
    pub async fn register_subsystem(
        self: &Arc<Self>,
        name: SubsystemName,
        hooks: Vec<Hook>,
        strategy: SelectionStrategy,
    ) -> Result<Arc<Subsystem>, BuildError> {
        let subsystem = Subsystem::new(
            name.clone(),
            self.config.scheduler.priority,
            self.config.queue.capacity,
            self.config.queue.policy,
        );
        subsystem.set_hooks(hooks).await;
        subsystem.build().await?;

        self.kernel.access_control.register_subsystem(Arc::clone(&subsystem));
        self.global_scheduler.register_subsystem(
            name.clone(),
            SubsystemScheduler::new(Arc::clone(&subsystem), strategy, self.config.scheduler.max_messages_per_slice),
        );
        self.subsystems.insert(name, Arc::clone(&subsystem));
        info!(subsystem_count = self.subsystems.len(), "subsystem registered");
        Ok(subsystem)
    }

    /// Every currently registered application subsystem name, not including
    /// the kernel.
    #[must_use]
    pub fn subsystem_names(&self) -> Vec<SubsystemName> {
        self.subsystems.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Mints a fresh top-level principal, owned by the kernel, for an
    /// external caller to authenticate future sends with.
    pub fn create_principal(&self, kind: PrincipalKind, metadata: Value) -> Result<Arc<Pkr>, KernelError> {
        self.kernel
            .access_control
            .create_principal(self.kernel.access_control.kernel_token(), kind, None, metadata)
            .map_err(KernelError::AccessControl)
    }

    /// Sends `body` to `path` as `kind` on behalf of `sender`, through the
    /// protected send path (§4.9). This is the fire-and-forget/command
    /// entrypoint; for a call that awaits exactly one reply, see
    /// [`MessageSystem::perform_request`].
    pub async fn send(&self, sender: &Pkr, path: impl Into<String>, kind: MessageKind, body: Value) -> Value {
        let message = Arc::new(Message::new(path, kind, body, sender.public_key().to_string()));
        self.kernel.access_control.send_protected(sender, message, json!({})).await
    }

    /// Sends `body` to `path` as a command and awaits exactly one reply or
    /// `self.config().request.default_timeout`, whichever comes first.
    pub async fn perform_request(&self, sender: &Pkr, path: impl Into<String>, body: Value) -> Result<Value, RequestError> {
        request::perform_request(
            &self.kernel.access_control,
            &self.command_manager,
            &self.time_provider,
            sender,
            path,
            body,
            self.config.request.default_timeout,
        )
        .await
    }

    /// Delivers `response` to whichever in-process waiter is registered
    /// under `correlation_id` (a downstream handler calls this once it has
    /// produced a reply to a `perform_request` caller).
    #[must_use]
    pub fn handle_command_reply(&self, correlation_id: CorrelationId, response: Value) -> bool {
        self.command_manager.handle_command_reply(correlation_id, response)
    }

    /// Runs one scheduling cycle: the `GlobalScheduler` grants a slice to
    /// one registered subsystem (kernel included) per its active strategy.
    pub async fn run_once(&self) -> Option<SubsystemName> {
        self.global_scheduler.run_once().await
    }

    /// Starts the scheduling loop (`run_once` becomes a no-op until this is called).
    pub fn start(&self) {
        self.global_scheduler.start();
    }

    /// Stops the scheduling loop and rejects every outstanding `perform_request` waiter.
    pub fn stop(&self) {
        self.global_scheduler.stop();
        self.command_manager.dispose();
    }

    /// The kernel subsystem itself, for introspection (route listing, queue depth).
    #[must_use]
    pub fn kernel_subsystem(&self) -> &Arc<Subsystem> {
        &self.kernel_subsystem
    }
}

/// Builds the `Deliver` callback handed to `ResponseManager`: forwards a
/// synthesized or real response onward as a `Response`-kind message sent by
/// the kernel. Boxed behind a lazily-populated cell because the
/// `AccessControl` it needs doesn't exist until *after* `build_kernel_subsystem`
/// (which itself takes this closure) returns.
fn forwarding_deliver(access_control_cell: Arc<OnceCell<Arc<AccessControl>>>) -> Deliver {
    Arc::new(move |reply_to, response| {
        let Some(access_control) = access_control_cell.get().cloned() else {
            return;
        };
        tokio::spawn(async move {
            let kernel_token = access_control.kernel_token().clone();
            if let Some(kernel_pkr) = access_control.get_principal(&kernel_token) {
                let message = Arc::new(Message::new(reply_to, MessageKind::Response, response, kernel_token.to_string()));
                let _ = access_control.send_protected(&kernel_pkr, message, json!({})).await;
            }
        });
    })
}
