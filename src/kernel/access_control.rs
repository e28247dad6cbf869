//! Capability model: principals, reader/writer sets, and the protected send
//! path (§4.9).

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::domain_types::{PrincipalId, PublicKeyToken, ScopeName, SubsystemName};
use crate::error::AccessControlError;
use crate::message::Message;
use crate::router::split_scheme;
use crate::subsystem::Subsystem;

/// What a principal is, which constrains who may mint it (§3.1, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrincipalKind {
    /// The kernel itself; the only principal that can mint top-level principals.
    Kernel,
    /// A top-level principal, minted directly by the kernel; owns its children.
    TopLevel,
    /// A principal owned by another (non-kernel) principal.
    Child,
    /// A user-facing principal.
    Friend,
    /// A principal standing in for a resource rather than an actor.
    Resource,
}

/// A capability handle for a principal (§3.1). Identity is conveyed by
/// `public_key` equality, not by `id` alone (§3.3).
#[derive(Debug, Clone)]
pub struct Pkr {
    id: PrincipalId,
    kind: PrincipalKind,
    public_key: PublicKeyToken,
    minter: PublicKeyToken,
    expires_at: Option<DateTime<Utc>>,
    metadata: Value,
}

impl Pkr {
    /// This principal's unique id.
    #[must_use]
    pub fn id(&self) -> PrincipalId {
        self.id
    }

    /// What kind of principal this is.
    #[must_use]
    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// The opaque token presented to authorize sends.
    #[must_use]
    pub fn public_key(&self) -> &PublicKeyToken {
        &self.public_key
    }

    /// The token of the principal that minted this one.
    #[must_use]
    pub fn minter(&self) -> &PublicKeyToken {
        &self.minter
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Per-subject permissions (§3.1): a set of reader tokens, a set of writer
/// tokens, and an owner token that alone (besides the kernel) may mutate
/// them.
#[derive(Debug)]
pub struct Rws {
    owner: PublicKeyToken,
    readers: RwLock<HashSet<PublicKeyToken>>,
    writers: RwLock<HashSet<PublicKeyToken>>,
}

impl Rws {
    fn new(owner: PublicKeyToken) -> Self {
        Self {
            owner,
            readers: RwLock::new(HashSet::new()),
            writers: RwLock::new(HashSet::new()),
        }
    }

    /// The owning token.
    #[must_use]
    pub fn owner(&self) -> &PublicKeyToken {
        &self.owner
    }

    fn is_authorized_granter(&self, granter: &PublicKeyToken, kernel: &PublicKeyToken) -> bool {
        granter == &self.owner || granter == kernel
    }

    /// Grants read access. Only the owner or the kernel may call this.
    pub fn add_reader(
        &self,
        granter: &PublicKeyToken,
        kernel: &PublicKeyToken,
        grantee: PublicKeyToken,
    ) -> Result<(), AccessControlError> {
        if !self.is_authorized_granter(granter, kernel) {
            return Err(AccessControlError::NotOwner);
        }
        self.readers.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(grantee);
        Ok(())
    }

    /// Grants write access (and implicitly read access; see [`Rws::can_read`]).
    pub fn add_writer(
        &self,
        granter: &PublicKeyToken,
        kernel: &PublicKeyToken,
        grantee: PublicKeyToken,
    ) -> Result<(), AccessControlError> {
        if !self.is_authorized_granter(granter, kernel) {
            return Err(AccessControlError::NotOwner);
        }
        self.writers.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(grantee);
        Ok(())
    }

    /// Revokes read access.
    pub fn remove_reader(
        &self,
        granter: &PublicKeyToken,
        kernel: &PublicKeyToken,
        grantee: &PublicKeyToken,
    ) -> Result<(), AccessControlError> {
        if !self.is_authorized_granter(granter, kernel) {
            return Err(AccessControlError::NotOwner);
        }
        self.readers.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(grantee);
        Ok(())
    }

    /// Revokes write access.
    pub fn remove_writer(
        &self,
        granter: &PublicKeyToken,
        kernel: &PublicKeyToken,
        grantee: &PublicKeyToken,
    ) -> Result<(), AccessControlError> {
        if !self.is_authorized_granter(granter, kernel) {
            return Err(AccessControlError::NotOwner);
        }
        self.writers.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(grantee);
        Ok(())
    }

    /// Whether `token` may read: owner, an explicit reader, or a writer
    /// (write access implies read access).
    #[must_use]
    pub fn can_read(&self, token: &PublicKeyToken) -> bool {
        token == &self.owner
            || self.readers.read().unwrap_or_else(std::sync::PoisonError::into_inner).contains(token)
            || self.writers.read().unwrap_or_else(std::sync::PoisonError::into_inner).contains(token)
    }

    /// Whether `token` may write: owner or an explicit writer.
    #[must_use]
    pub fn can_write(&self, token: &PublicKeyToken) -> bool {
        token == &self.owner
            || self.writers.read().unwrap_or_else(std::sync::PoisonError::into_inner).contains(token)
    }
}

/// Invoked after a send is authorized and carries `responseRequired`, so the
/// kernel's `ResponseManager` can register a waiter without `AccessControl`
/// depending on it directly.
pub type ResponseHook = Arc<dyn Fn(Arc<Message>, Value) + Send + Sync>;

/// Invoked whenever `sendProtected` denies a send, so the kernel's error
/// manager can record it (`kernel://error/record/auth_failed`, §4.9 step 5)
/// without `AccessControl` depending on the error manager directly.
pub type ErrorRecorder = Arc<dyn Fn(Value, Option<SubsystemName>) + Send + Sync>;

/// The capability model service: principal registry, per-scope RWS, and the
/// `sendProtected` authorization path (§4.9).
pub struct AccessControl {
    kernel_token: PublicKeyToken,
    principals: DashMap<PublicKeyToken, Arc<Pkr>>,
    rws_by_scope: DashMap<ScopeName, Arc<Rws>>,
    subsystems: DashMap<SubsystemName, Arc<Subsystem>>,
    response_hook: RwLock<Option<ResponseHook>>,
    error_recorder: RwLock<Option<ErrorRecorder>>,
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl")
            .field("principal_count", &self.principals.len())
            .field("scope_count", &self.rws_by_scope.len())
            .finish_non_exhaustive()
    }
}

impl AccessControl {
    /// Creates the service, minting the kernel's own principal under
    /// `kernel_token`.
    #[must_use]
    pub fn new(kernel_token: PublicKeyToken) -> Self {
        let kernel_pkr = Arc::new(Pkr {
            id: PrincipalId::generate(),
            kind: PrincipalKind::Kernel,
            public_key: kernel_token.clone(),
            minter: kernel_token.clone(),
            expires_at: None,
            metadata: json!({}),
        });
        let principals = DashMap::new();
        principals.insert(kernel_token.clone(), kernel_pkr);
        Self {
            kernel_token,
            principals,
            rws_by_scope: DashMap::new(),
            subsystems: DashMap::new(),
            response_hook: RwLock::new(None),
            error_recorder: RwLock::new(None),
        }
    }

    /// The kernel's own token.
    #[must_use]
    pub fn kernel_token(&self) -> &PublicKeyToken {
        &self.kernel_token
    }

    /// Registers a subsystem so `sendProtected` can route to it by scheme.
    pub fn register_subsystem(&self, subsystem: Arc<Subsystem>) {
        self.subsystems.insert(subsystem.name().clone(), subsystem);
    }

    /// Installs the callback invoked when an authorized send carries
    /// `options.responseRequired`.
    pub fn set_response_hook(&self, hook: ResponseHook) {
        *self.response_hook.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(hook);
    }

    /// Installs the callback invoked whenever `sendProtected` denies a send.
    pub fn set_error_recorder(&self, recorder: ErrorRecorder) {
        *self.error_recorder.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(recorder);
    }

    fn record_denial(&self, failure: &Value, subsystem: Option<&SubsystemName>) {
        let recorder = self.error_recorder.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(recorder) = recorder {
            recorder(failure.clone(), subsystem.cloned());
        }
    }

    /// Mints a new principal. Only the kernel may mint a `TopLevel`
    /// principal (§4.9); any live principal may mint a `Child`/`Friend`/
    /// `Resource` principal it then owns.
    pub fn create_principal(
        &self,
        minter: &PublicKeyToken,
        kind: PrincipalKind,
        owner: Option<PublicKeyToken>,
        metadata: Value,
    ) -> Result<Arc<Pkr>, AccessControlError> {
        let minter_pkr = self.principals.get(minter).ok_or(AccessControlError::CredentialNotLive)?;
        if !self.is_live(&minter_pkr) {
            return Err(AccessControlError::CredentialNotLive);
        }
        if matches!(kind, PrincipalKind::TopLevel) && minter_pkr.kind() != PrincipalKind::Kernel {
            return Err(AccessControlError::NotOwner);
        }

        let token = PublicKeyToken::try_new(uuid::Uuid::new_v4().to_string())
            .unwrap_or_else(|_| unreachable!("uuid string is always valid"));
        let pkr = Arc::new(Pkr {
            id: PrincipalId::generate(),
            kind,
            public_key: token.clone(),
            minter: minter.clone(),
            expires_at: None,
            metadata,
        });
        self.principals.insert(token, Arc::clone(&pkr));
        let _ = owner; // ownership is tracked via each resource's RWS, not on the Pkr itself
        Ok(pkr)
    }

    /// Looks up a principal by its public key token.
    #[must_use]
    pub fn get_principal(&self, token: &PublicKeyToken) -> Option<Arc<Pkr>> {
        self.principals.get(token).map(|p| Arc::clone(&p))
    }

    /// A principal's credential is live if it has not expired and its
    /// minter is still a registered principal (§4.9 step 1).
    #[must_use]
    pub fn is_live(&self, pkr: &Pkr) -> bool {
        if pkr.is_expired(Utc::now()) {
            return false;
        }
        pkr.kind == PrincipalKind::Kernel || self.principals.contains_key(&pkr.minter)
    }

    /// Returns the RWS for `scope`, creating one owned by the kernel if it
    /// doesn't exist yet.
    #[must_use]
    pub fn rws_for_scope(&self, scope: &ScopeName) -> Arc<Rws> {
        Arc::clone(
            self.rws_by_scope
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(Rws::new(self.kernel_token.clone()))),
        )
    }

    /// Determines the scope a path requires: the matched route's declared
    /// scope if present, else `"{subsystem}:{first-segment}"`.
    fn resolve_scope(&self, subsystem: &Subsystem, relative_path: &str) -> ScopeName {
        if let Some(route_match) = subsystem.router().match_path(relative_path) {
            if let Some(scope) = route_match.scope {
                if let Ok(scope) = ScopeName::try_new(scope) {
                    return scope;
                }
            }
        }
        let first_segment = relative_path.split('/').find(|s| !s.is_empty()).unwrap_or("default");
        ScopeName::try_new(format!("{}:{first_segment}", subsystem.name()))
            .unwrap_or_else(|_| ScopeName::try_new("default:default".to_string()).unwrap())
    }

    /// The protected send path (§4.9): verifies the sender's credential,
    /// resolves the target subsystem and required scope, checks the
    /// sender's RWS membership for that scope, then forwards to
    /// `subsystem.accept`. Never panics; every failure is a structured
    /// `{success: false, ...}` result.
    #[instrument(skip(self, message, options), fields(path = %message.get_path()))]
    pub async fn send_protected(&self, sender: &Pkr, message: Arc<Message>, options: Value) -> Value {
        if !self.is_live(sender) {
            warn!("send rejected: sender credential not live");
            let failure = json!({
                "success": false,
                "type": "auth_failed",
                "message": "principal credential is not live",
            });
            self.record_denial(&failure, None);
            return failure;
        }

        let path = message.get_path().to_string();
        let (scheme, relative_path) = split_scheme(&path);
        if scheme.is_empty() {
            let failure = json!({
                "success": false,
                "type": "auth_failed",
                "message": format!("path `{path}` has no subsystem scheme"),
            });
            self.record_denial(&failure, None);
            return failure;
        }
        let Ok(subsystem_name) = SubsystemName::try_new(scheme.to_string()) else {
            let failure = json!({"success": false, "type": "auth_failed", "message": "invalid subsystem scheme"});
            self.record_denial(&failure, None);
            return failure;
        };
        let Some(subsystem) = self.subsystems.get(&subsystem_name).map(|s| Arc::clone(&s)) else {
            warn!(scheme = %scheme, "send rejected: unknown subsystem");
            let failure = json!({
                "success": false,
                "type": "auth_failed",
                "message": format!("no subsystem registered for scheme `{scheme}`"),
            });
            self.record_denial(&failure, Some(&subsystem_name));
            return failure;
        };

        let required_scope = self.resolve_scope(&subsystem, relative_path);
        let rws = self.rws_for_scope(&required_scope);
        let permitted = if message.is_query() {
            rws.can_read(sender.public_key())
        } else {
            rws.can_write(sender.public_key())
        };

        if !permitted {
            warn!(scope = %required_scope, "send rejected: capability not granted");
            let failure = json!({
                "success": false,
                "type": "auth_failed",
                "message": format!("principal lacks `{required_scope}` capability for path `{path}`"),
                "scope": required_scope.to_string(),
            });
            self.record_denial(&failure, Some(&subsystem_name));
            return failure;
        }

        if let Some(response_required) = options.get("responseRequired").cloned() {
            if let Some(hook) = self.response_hook.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone() {
                hook(Arc::clone(&message), response_required);
            }
        }

        let accepted = subsystem.accept(message, options).await;
        json!({"success": accepted})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{QueueCapacity, SchedulingPriority};
    use crate::message::MessageKind;
    use crate::queue::OverflowPolicy;
    use serde_json::json;

    fn token(s: &str) -> PublicKeyToken {
        PublicKeyToken::try_new(s.to_string()).unwrap()
    }

    fn scope(s: &str) -> ScopeName {
        ScopeName::try_new(s.to_string()).unwrap()
    }

    fn name(s: &str) -> SubsystemName {
        SubsystemName::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn create_principal_rejects_top_level_mint_by_non_kernel() {
        let ac = AccessControl::new(token("kernel"));
        let friend = ac
            .create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({}))
            .unwrap();
        let err = ac
            .create_principal(friend.public_key(), PrincipalKind::TopLevel, None, json!({}))
            .unwrap_err();
        assert!(matches!(err, AccessControlError::NotOwner));
    }

    #[test]
    fn rws_add_reader_requires_owner_or_kernel() {
        let owner = token("owner");
        let rws = Rws::new(owner.clone());
        let kernel = token("kernel");
        let stranger = token("stranger");
        let err = rws.add_reader(&stranger, &kernel, token("grantee")).unwrap_err();
        assert!(matches!(err, AccessControlError::NotOwner));
        rws.add_reader(&owner, &kernel, token("grantee")).unwrap();
        assert!(rws.can_read(&token("grantee")));
    }

    #[test]
    fn writer_access_implies_read_access() {
        let owner = token("owner");
        let kernel = token("kernel");
        let rws = Rws::new(owner.clone());
        rws.add_writer(&owner, &kernel, token("w")).unwrap();
        assert!(rws.can_write(&token("w")));
        assert!(rws.can_read(&token("w")));
    }

    #[tokio::test]
    async fn send_protected_denies_unknown_subsystem() {
        let ac = AccessControl::new(token("kernel"));
        let sender = ac.get_principal(&token("kernel")).unwrap();
        let msg = Arc::new(Message::new("nosuch://create", MessageKind::Command, json!({}), "test"));
        let result = ac.send_protected(&sender, msg, json!({})).await;
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["type"], json!("auth_failed"));
    }

    #[tokio::test]
    async fn send_protected_denies_without_capability_grant() {
        let ac = AccessControl::new(token("kernel"));
        let sub = Subsystem::new(name("widgets"), SchedulingPriority::default(), QueueCapacity::try_new(4).unwrap(), OverflowPolicy::Reject);
        ac.register_subsystem(Arc::clone(&sub));
        let friend = ac
            .create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({}))
            .unwrap();
        let msg = Arc::new(Message::new("widgets://create", MessageKind::Command, json!({}), "test"));
        let result = ac.send_protected(&friend, msg, json!({})).await;
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["type"], json!("auth_failed"));
    }

    #[tokio::test]
    async fn send_protected_forwards_once_scope_is_granted() {
        let ac = AccessControl::new(token("kernel"));
        let sub = Subsystem::new(name("widgets"), SchedulingPriority::default(), QueueCapacity::try_new(4).unwrap(), OverflowPolicy::Reject);
        sub.router().register_route(
            "create",
            Arc::new(|_msg, _params, _opts| json!({"success": true})),
            Some("widgets:create".to_string()),
            None,
        );
        ac.register_subsystem(Arc::clone(&sub));
        let friend = ac
            .create_principal(&token("kernel"), PrincipalKind::Friend, None, json!({}))
            .unwrap();
        ac.rws_for_scope(&scope("widgets:create"))
            .add_writer(&token("kernel"), &token("kernel"), friend.public_key().clone())
            .unwrap();

        let msg = Arc::new(Message::new("widgets://create", MessageKind::Command, json!({}), "test"));
        let result = ac.send_protected(&friend, msg, json!({})).await;
        assert_eq!(result["success"], json!(true));
        assert_eq!(sub.queue().size(), 1);
    }
}
