//! Pattern-based route table (§3.1, §4.3).
//!
//! Patterns are `/`-separated segments, each `static`, `:name` (captures), or a
//! terminal `*` (wildcard, matches the remaining tail). Matching is
//! deterministic (§3.2 invariant 6) via the tie-break order in §4.3: exact
//! static beats parameterized beats wildcard; ties broken by longer static
//! prefix, then by registration order.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::message::Message;

/// A single parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern, ready for matching.
#[derive(Debug, Clone)]
struct CompiledPattern {
    segments: Vec<Segment>,
    source: String,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|seg| {
                if seg == "*" {
                    Segment::Wildcard
                } else if let Some(name) = seg.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Static(seg.to_string())
                }
            })
            .collect();
        Self {
            segments,
            source: pattern.to_string(),
        }
    }

    /// Attempts to match `path_segments` against this pattern, returning
    /// captured params on success.
    fn try_match(&self, path_segments: &[&str]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut path_iter = path_segments.iter();

        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Wildcard => {
                    // Wildcard must be terminal; it swallows everything remaining.
                    debug_assert_eq!(i, self.segments.len() - 1);
                    return Some(params);
                }
                Segment::Static(expected) => match path_iter.next() {
                    Some(actual) if actual == expected => {}
                    _ => return None,
                },
                Segment::Param(name) => match path_iter.next() {
                    Some(actual) => {
                        params.insert(name.clone(), (*actual).to_string());
                    }
                    None => return None,
                },
            }
        }

        // Non-wildcard patterns must consume the path exactly.
        if path_iter.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// A specificity score used to break ties between multiple matches:
    /// higher is more specific. Exact static segments count more than
    /// params, which count more than a trailing wildcard.
    fn specificity(&self) -> (u32, u32, u32) {
        let mut statics = 0u32;
        let mut params = 0u32;
        let mut wildcards = 0u32;
        for seg in &self.segments {
            match seg {
                Segment::Static(_) => statics += 1,
                Segment::Param(_) => params += 1,
                Segment::Wildcard => wildcards += 1,
            }
        }
        (statics, params, wildcards)
    }
}

/// A handler invoked when its route matches. Returns a JSON-ish result; a
/// result containing `"success": false` is treated specially by the
/// processor (§4.7).
pub type Handler = std::sync::Arc<
    dyn Fn(&Message, &HashMap<String, String>, &Value) -> Value + Send + Sync,
>;

/// A registered `(pattern, handler, metadata)` triple (§3.1).
pub struct RouteEntry {
    pattern: String,
    compiled: CompiledPattern,
    handler: Handler,
    scope: Option<String>,
    description: Option<String>,
    registration_order: usize,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern)
            .field("scope", &self.scope)
            .field("registration_order", &self.registration_order)
            .finish_non_exhaustive()
    }
}

/// The result of a successful [`SubsystemRouter::match_path`] call.
pub struct RouteMatch<'a> {
    /// The matched handler.
    pub handler: Handler,
    /// Captured `:param` values.
    pub params: HashMap<String, String>,
    /// The entry that matched, for diagnostics.
    pub entry: &'a RouteEntry,
}

/// A subsystem's pattern table (§3.1, §4.3).
#[derive(Default)]
pub struct SubsystemRouter {
    entries: RwLock<Vec<RouteEntry>>,
    next_order: std::sync::atomic::AtomicUsize,
}

impl std::fmt::Debug for SubsystemRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("SubsystemRouter")
            .field("route_count", &entries.len())
            .finish()
    }
}

impl SubsystemRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `pattern`. Re-registering the same pattern
    /// string replaces the prior entry in place (keeping its original
    /// registration order is not required by §4.3 beyond tie-breaking, so a
    /// fresh registration is appended and supersedes nothing but shares no
    /// conflict — distinct patterns simply coexist and are ranked by
    /// specificity).
    pub fn register_route(
        &self,
        pattern: impl Into<String>,
        handler: Handler,
        scope: Option<String>,
        description: Option<String>,
    ) {
        let pattern = pattern.into();
        let order = self.next_order.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = RouteEntry {
            compiled: CompiledPattern::compile(&pattern),
            pattern,
            handler,
            scope,
            description,
            registration_order: order,
        };
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.push(entry);
    }

    /// Removes the entry registered under the exact pattern string, if any.
    pub fn unregister_route(&self, pattern: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.pattern != pattern);
        entries.len() != before
    }

    /// Matches `path` against all registered patterns, applying the
    /// deterministic tie-break order of §4.3. Returns `None` if nothing
    /// matches — never throws (§4.3).
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<RouteMatchOwned> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut best: Option<(usize, HashMap<String, String>)> = None;
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(params) = entry.compiled.try_match(&segments) {
                let candidate_specificity = entry.compiled.specificity();
                let better = match &best {
                    None => true,
                    Some((best_idx, _)) => {
                        let best_entry = &entries[*best_idx];
                        let best_specificity = best_entry.compiled.specificity();
                        match candidate_specificity.cmp(&best_specificity) {
                            std::cmp::Ordering::Greater => true,
                            std::cmp::Ordering::Less => false,
                            std::cmp::Ordering::Equal => {
                                entry.registration_order < best_entry.registration_order
                            }
                        }
                    }
                };
                if better {
                    best = Some((idx, params));
                }
            }
        }

        best.map(|(idx, params)| RouteMatchOwned {
            handler: entries[idx].handler.clone(),
            params,
            pattern: entries[idx].pattern.clone(),
            scope: entries[idx].scope.clone(),
        })
    }

    /// Lists the currently registered pattern strings, for diagnostics
    /// (`availableRoutes` in §4.7's no-route failure shape).
    #[must_use]
    pub fn available_routes(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.iter().map(|e| e.pattern.clone()).collect()
    }
}

/// An owned variant of [`RouteMatch`], returned from `match_path` so callers
/// aren't tied to the router's read-lock guard lifetime.
pub struct RouteMatchOwned {
    /// The matched handler.
    pub handler: Handler,
    /// Captured `:param` values.
    pub params: HashMap<String, String>,
    /// The pattern string that matched.
    pub pattern: String,
    /// The scope label this route was registered with, if any, consulted
    /// by the capability model (§4.9) to determine the required scope.
    pub scope: Option<String>,
}

/// Splits a canonical `scheme://segment/...` path into `(scheme, rest)`.
/// Paths without a `://` are returned unchanged as `rest` with an empty
/// scheme, so callers that only ever deal in scheme-relative paths (e.g. a
/// subsystem's own route table) are unaffected.
#[must_use]
pub fn split_scheme(path: &str) -> (&str, &str) {
    match path.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> Handler {
        std::sync::Arc::new(|_msg, _params, _opts| json!({"success": true}))
    }

    #[test]
    fn exact_static_beats_parameterized() {
        let router = SubsystemRouter::new();
        router.register_route("users/:id", noop_handler(), None, None);
        router.register_route("users/root", noop_handler(), None, None);

        let m = router.match_path("users/root").unwrap();
        assert_eq!(m.pattern, "users/root");

        let m = router.match_path("users/42").unwrap();
        assert_eq!(m.pattern, "users/:id");
        assert_eq!(m.params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn parameterized_beats_wildcard() {
        let router = SubsystemRouter::new();
        router.register_route("files/*", noop_handler(), None, None);
        router.register_route("files/:name", noop_handler(), None, None);

        let m = router.match_path("files/report").unwrap();
        assert_eq!(m.pattern, "files/:name");
    }

    #[test]
    fn longer_static_prefix_wins_among_equal_specificity() {
        let router = SubsystemRouter::new();
        router.register_route("a/:x", noop_handler(), None, None);
        router.register_route("a/b/:x", noop_handler(), None, None);

        let m = router.match_path("a/b/c").unwrap();
        assert_eq!(m.pattern, "a/b/:x");
    }

    #[test]
    fn first_registered_wins_when_fully_tied() {
        let router = SubsystemRouter::new();
        router.register_route(":a/:b", noop_handler(), None, None);
        router.register_route(":x/:y", noop_handler(), None, None);

        let m = router.match_path("p/q").unwrap();
        assert_eq!(m.pattern, ":a/:b");
    }

    #[test]
    fn no_matching_pattern_returns_none() {
        let router = SubsystemRouter::new();
        router.register_route("users/:id", noop_handler(), None, None);
        assert!(router.match_path("orders/1").is_none());
    }

    #[test]
    fn match_is_deterministic_across_repeated_calls() {
        let router = SubsystemRouter::new();
        router.register_route("users/:id", noop_handler(), None, None);
        router.register_route("users/root", noop_handler(), None, None);
        let first = router.match_path("users/root").unwrap().pattern;
        let second = router.match_path("users/root").unwrap().pattern;
        assert_eq!(first, second);
    }

    #[test]
    fn reregistering_more_specific_route_changes_future_matches() {
        let router = SubsystemRouter::new();
        router.register_route("users/:id", noop_handler(), None, None);
        assert_eq!(router.match_path("users/root").unwrap().pattern, "users/:id");

        router.register_route("users/root", noop_handler(), None, None);
        assert_eq!(router.match_path("users/root").unwrap().pattern, "users/root");
        // Other paths are unaffected.
        assert_eq!(router.match_path("users/42").unwrap().pattern, "users/:id");
    }
}
