//! Long-lived, participant-scoped named reply buses (§4.8).

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::domain_types::PublicKeyToken;

/// A named, persistent reply bus owned by an identity (§3.1).
#[derive(Debug, Clone)]
pub struct Channel {
    route: String,
    owner: PublicKeyToken,
    participants: HashSet<PublicKeyToken>,
    metadata: Value,
}

impl Channel {
    /// The channel's full route.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The identity that created this channel.
    #[must_use]
    pub fn owner(&self) -> &PublicKeyToken {
        &self.owner
    }

    /// Current participant set.
    #[must_use]
    pub fn participants(&self) -> &HashSet<PublicKeyToken> {
        &self.participants
    }

    /// Adds a participant to the channel.
    pub fn add_participant(&mut self, participant: PublicKeyToken) {
        self.participants.insert(participant);
    }

    /// A name this channel can also be resolved by, from `metadata.name`.
    #[must_use]
    pub fn metadata_name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(Value::as_str)
    }
}

/// Registry of channels, indexed both by full route and by owning identity
/// (§4.8 `createChannel`/`getChannel`/`list`/`ensureChannel`).
#[derive(Default)]
pub struct ChannelManager {
    by_route: DashMap<String, Arc<RwLock<Channel>>>,
    by_owner: DashMap<PublicKeyToken, Vec<Arc<RwLock<Channel>>>>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channel_count", &self.by_route.len())
            .finish()
    }
}

impl ChannelManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel at `route`, owned by `owner`, with the given
    /// initial participants and metadata. Replaces any existing channel
    /// already registered at that exact route.
    pub fn create_channel(
        &self,
        owner: PublicKeyToken,
        route: impl Into<String>,
        participants: HashSet<PublicKeyToken>,
        metadata: Value,
    ) -> Arc<RwLock<Channel>> {
        let route = route.into();
        let channel = Arc::new(RwLock::new(Channel {
            route: route.clone(),
            owner: owner.clone(),
            participants,
            metadata,
        }));
        self.by_route.insert(route, Arc::clone(&channel));
        self.by_owner.entry(owner).or_default().push(Arc::clone(&channel));
        channel
    }

    /// Resolves a channel either by its exact route, by a `metadata.name`
    /// match, or by route suffix (§4.8).
    #[must_use]
    pub fn get_channel(&self, name_or_route: &str) -> Option<Arc<RwLock<Channel>>> {
        if let Some(channel) = self.by_route.get(name_or_route) {
            return Some(Arc::clone(&channel));
        }
        self.by_route.iter().find_map(|entry| {
            let channel = entry.value();
            let guard = channel.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            let matches_name = guard.metadata_name() == Some(name_or_route);
            let matches_suffix = guard.route.ends_with(&format!("/{name_or_route}"));
            drop(guard);
            (matches_name || matches_suffix).then(|| Arc::clone(channel))
        })
    }

    /// All channels owned by `owner`, in creation order.
    #[must_use]
    pub fn list(&self, owner: &PublicKeyToken) -> Vec<Arc<RwLock<Channel>>> {
        self.by_owner.get(owner).map(|v| v.clone()).unwrap_or_default()
    }

    /// Get-or-create: returns the existing channel at `route` if present,
    /// otherwise creates one.
    pub fn ensure_channel(
        &self,
        owner: PublicKeyToken,
        route: impl Into<String>,
        participants: HashSet<PublicKeyToken>,
        metadata: Value,
    ) -> Arc<RwLock<Channel>> {
        let route = route.into();
        if let Some(existing) = self.by_route.get(&route) {
            return Arc::clone(&existing);
        }
        self.create_channel(owner, route, participants, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(s: &str) -> PublicKeyToken {
        PublicKeyToken::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn get_channel_resolves_by_exact_route() {
        let mgr = ChannelManager::new();
        mgr.create_channel(token("alice"), "kernel://channels/alice/main", HashSet::new(), json!({}));
        assert!(mgr.get_channel("kernel://channels/alice/main").is_some());
    }

    #[test]
    fn get_channel_resolves_by_metadata_name() {
        let mgr = ChannelManager::new();
        mgr.create_channel(
            token("alice"),
            "kernel://channels/alice/abc123",
            HashSet::new(),
            json!({"name": "main"}),
        );
        assert!(mgr.get_channel("main").is_some());
    }

    #[test]
    fn get_channel_resolves_by_route_suffix() {
        let mgr = ChannelManager::new();
        mgr.create_channel(token("alice"), "kernel://channels/alice/main", HashSet::new(), json!({}));
        assert!(mgr.get_channel("main").is_some());
    }

    #[test]
    fn ensure_channel_returns_existing_without_duplicating() {
        let mgr = ChannelManager::new();
        let first = mgr.ensure_channel(token("alice"), "kernel://channels/alice/main", HashSet::new(), json!({}));
        let second = mgr.ensure_channel(token("alice"), "kernel://channels/alice/main", HashSet::new(), json!({}));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.list(&token("alice")).len(), 1);
    }

    #[test]
    fn list_returns_only_channels_owned_by_the_identity() {
        let mgr = ChannelManager::new();
        mgr.create_channel(token("alice"), "kernel://channels/alice/a", HashSet::new(), json!({}));
        mgr.create_channel(token("bob"), "kernel://channels/bob/b", HashSet::new(), json!({}));
        assert_eq!(mgr.list(&token("alice")).len(), 1);
        assert_eq!(mgr.list(&token("bob")).len(), 1);
    }
}
