//! Named grant bundles and their application to principals (§4.10).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::domain_types::{PublicKeyToken, ScopeName};
use crate::error::ConfigError;
use crate::kernel::access_control::AccessControl;

/// A scope's grant level within a [`SecurityProfile`].
///
/// `Rwg` (read + write + grant) maps to exactly the same RWS membership as
/// `Rw`: this crate does not expose a distinct "grant" tier through
/// profiles. Delegating a grant to another principal remains exclusively a
/// capability of the resource's owner or the kernel, invoked directly
/// against the RWS rather than through a profile (§4.10, resolving Open
/// Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GrantLevel {
    /// Read-only.
    R,
    /// Read and write.
    Rw,
    /// Read, write, and (nominally) grant — applied identically to `Rw`.
    Rwg,
}

/// A named, reusable grant bundle (§3.1).
#[derive(Debug, Clone)]
pub struct SecurityProfile {
    name: String,
    uuid: Uuid,
    grants: HashMap<ScopeName, GrantLevel>,
    metadata: Value,
}

impl SecurityProfile {
    /// The profile's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The profile's identity, stable across `updateProfile` calls.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The scope→level grants this profile carries.
    #[must_use]
    pub fn grants(&self) -> &HashMap<ScopeName, GrantLevel> {
        &self.grants
    }
}

/// Registry of named [`SecurityProfile`]s and the operations that apply or
/// remove them from a principal's capability grants (§4.10).
pub struct ProfileRegistry {
    profiles: DashMap<String, Arc<RwLock<SecurityProfile>>>,
    access_control: Arc<AccessControl>,
}

impl std::fmt::Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("profile_count", &self.profiles.len())
            .finish_non_exhaustive()
    }
}

impl ProfileRegistry {
    /// Creates an empty registry backed by `access_control`'s RWS machinery.
    #[must_use]
    pub fn new(access_control: Arc<AccessControl>) -> Self {
        Self {
            profiles: DashMap::new(),
            access_control,
        }
    }

    /// Creates (or replaces) a named profile with a fresh identity.
    pub fn create_profile(
        &self,
        name: impl Into<String>,
        grants: HashMap<ScopeName, GrantLevel>,
        metadata: Value,
    ) -> Arc<RwLock<SecurityProfile>> {
        let name = name.into();
        let profile = Arc::new(RwLock::new(SecurityProfile {
            name: name.clone(),
            uuid: Uuid::new_v4(),
            grants,
            metadata,
        }));
        self.profiles.insert(name, Arc::clone(&profile));
        profile
    }

    /// Looks up a profile by name.
    #[must_use]
    pub fn get_profile(&self, name: &str) -> Option<Arc<RwLock<SecurityProfile>>> {
        self.profiles.get(name).map(|p| Arc::clone(&p))
    }

    /// Updates a profile's grants, preserving its identity (`uuid`). When
    /// `replace` is `true` the grant map is replaced wholesale; otherwise
    /// `grants` is merged into the existing map, key by key.
    pub fn update_profile(
        &self,
        name: &str,
        grants: HashMap<ScopeName, GrantLevel>,
        replace: bool,
    ) -> Result<Arc<RwLock<SecurityProfile>>, ConfigError> {
        let profile = self.profiles.get(name).map(|p| Arc::clone(&p)).ok_or_else(|| ConfigError::Validation {
            field: "profile".to_string(),
            reason: format!("no profile named `{name}`"),
        })?;
        {
            let mut guard = profile.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            if replace {
                guard.grants = grants;
            } else {
                guard.grants.extend(grants);
            }
        }
        Ok(profile)
    }

    /// Removes a profile. Returns `false` if it didn't exist.
    pub fn delete_profile(&self, name: &str) -> bool {
        self.profiles.remove(name).is_some()
    }

    /// Applies every scope→level grant in the named profile to `principal`,
    /// using the kernel as granter. Idempotent: re-applying the same
    /// profile to the same principal adds no new RWS membership (§4.10).
    #[instrument(skip(self))]
    pub fn apply_profile_to_principal(&self, name: &str, principal: &PublicKeyToken) -> Result<(), ConfigError> {
        let profile = self.get_profile(name).ok_or_else(|| ConfigError::Validation {
            field: "profile".to_string(),
            reason: format!("no profile named `{name}`"),
        })?;
        let guard = profile.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let kernel = self.access_control.kernel_token().clone();
        for (scope, level) in &guard.grants {
            let rws = self.access_control.rws_for_scope(scope);
            match level {
                GrantLevel::R => {
                    let _ = rws.add_reader(&kernel, &kernel, principal.clone());
                }
                GrantLevel::Rw | GrantLevel::Rwg => {
                    let _ = rws.add_writer(&kernel, &kernel, principal.clone());
                }
            }
        }
        Ok(())
    }

    /// The inverse of [`ProfileRegistry::apply_profile_to_principal`]:
    /// revokes every grant the profile describes, best-effort (a grant
    /// already absent is not an error).
    pub fn remove_profile_from_principal(&self, name: &str, principal: &PublicKeyToken) -> Result<(), ConfigError> {
        let profile = self.get_profile(name).ok_or_else(|| ConfigError::Validation {
            field: "profile".to_string(),
            reason: format!("no profile named `{name}`"),
        })?;
        let guard = profile.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let kernel = self.access_control.kernel_token().clone();
        for (scope, level) in &guard.grants {
            let rws = self.access_control.rws_for_scope(scope);
            match level {
                GrantLevel::R => {
                    let _ = rws.remove_reader(&kernel, &kernel, principal);
                }
                GrantLevel::Rw | GrantLevel::Rwg => {
                    let _ = rws.remove_writer(&kernel, &kernel, principal);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::PublicKeyToken;
    use serde_json::json;

    fn token(s: &str) -> PublicKeyToken {
        PublicKeyToken::try_new(s.to_string()).unwrap()
    }

    fn scope(s: &str) -> ScopeName {
        ScopeName::try_new(s.to_string()).unwrap()
    }

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new(Arc::new(AccessControl::new(token("kernel"))))
    }

    #[test]
    fn applying_profile_grants_reader_and_writer_scopes() {
        let reg = registry();
        let mut grants = HashMap::new();
        grants.insert(scope("workspace:read"), GrantLevel::R);
        grants.insert(scope("workspace:write"), GrantLevel::Rw);
        reg.create_profile("editor", grants, json!({}));

        reg.apply_profile_to_principal("editor", &token("alice")).unwrap();

        assert!(reg.access_control.rws_for_scope(&scope("workspace:read")).can_read(&token("alice")));
        assert!(reg.access_control.rws_for_scope(&scope("workspace:write")).can_write(&token("alice")));
    }

    #[test]
    fn applying_profile_twice_is_idempotent() {
        let reg = registry();
        let mut grants = HashMap::new();
        grants.insert(scope("workspace:write"), GrantLevel::Rw);
        reg.create_profile("editor", grants, json!({}));

        reg.apply_profile_to_principal("editor", &token("alice")).unwrap();
        reg.apply_profile_to_principal("editor", &token("alice")).unwrap();

        let rws = reg.access_control.rws_for_scope(&scope("workspace:write"));
        assert!(rws.can_write(&token("alice")));
    }

    #[test]
    fn rwg_grant_maps_to_writer_permission_only() {
        let reg = registry();
        let mut grants = HashMap::new();
        grants.insert(scope("workspace:admin"), GrantLevel::Rwg);
        reg.create_profile("admin", grants, json!({}));
        reg.apply_profile_to_principal("admin", &token("alice")).unwrap();

        let rws = reg.access_control.rws_for_scope(&scope("workspace:admin"));
        assert!(rws.can_write(&token("alice")));
        assert!(rws.can_read(&token("alice")));
        // Delegation is never exposed through the profile path; the RWS
        // itself has no notion of a third "grant" tier.
    }

    #[test]
    fn update_profile_preserves_uuid() {
        let reg = registry();
        let profile = reg.create_profile("editor", HashMap::new(), json!({}));
        let original_uuid = profile.read().unwrap().uuid();

        let mut grants = HashMap::new();
        grants.insert(scope("workspace:write"), GrantLevel::Rw);
        let updated = reg.update_profile("editor", grants, false).unwrap();
        assert_eq!(updated.read().unwrap().uuid(), original_uuid);
    }

    #[test]
    fn remove_profile_from_principal_revokes_grants() {
        let reg = registry();
        let mut grants = HashMap::new();
        grants.insert(scope("workspace:write"), GrantLevel::Rw);
        reg.create_profile("editor", grants, json!({}));
        reg.apply_profile_to_principal("editor", &token("alice")).unwrap();
        reg.remove_profile_from_principal("editor", &token("alice")).unwrap();

        let rws = reg.access_control.rws_for_scope(&scope("workspace:write"));
        assert!(!rws.can_write(&token("alice")));
    }
}
