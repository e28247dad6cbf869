//! Error classification and the bounded, queryable error store (§4.11).

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::domain_types::{ErrorStoreCapacity, FacetKind, SourceId, SubsystemName};
use crate::facet::{Facet, FacetContext, Hook, HookFn};
use crate::router::SubsystemRouter;

/// The normalized classification of an arbitrary error value (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// No route matched a path.
    Unroutable,
    /// A retry budget was exhausted.
    MaxRetries,
    /// An operation timed out.
    Timeout,
    /// An authorization check failed.
    AuthFailed,
    /// Input failed validation.
    Validation,
    /// An unexpected internal fault.
    Internal,
    /// A fault attributed to an external collaborator.
    External,
    /// Anything not covered by a more specific type.
    Simple,
}

impl ErrorType {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "unroutable" => Self::Unroutable,
            "maxretries" | "max_retries" => Self::MaxRetries,
            "timeout" => Self::Timeout,
            "auth_failed" => Self::AuthFailed,
            "validation" => Self::Validation,
            "internal" => Self::Internal,
            "external" => Self::External,
            _ => Self::Simple,
        }
    }
}

/// How severe a classified error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; no action implied.
    Info,
    /// Worth noting but recoverable.
    Warn,
    /// An operation failed.
    Error,
    /// A fault that may affect other operations.
    Critical,
}

impl Severity {
    fn from_type(kind: ErrorType) -> Self {
        match kind {
            ErrorType::Internal => Self::Critical,
            ErrorType::AuthFailed | ErrorType::Timeout | ErrorType::MaxRetries => Self::Warn,
            ErrorType::Unroutable | ErrorType::Validation | ErrorType::External => Self::Error,
            ErrorType::Simple => Self::Info,
        }
    }
}

/// A normalized, stored error (§3.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorRecord {
    /// Unique id.
    pub id: Uuid,
    /// Normalized classification.
    #[serde(rename = "type")]
    pub kind: ErrorType,
    /// Severity.
    pub severity: Severity,
    /// The subsystem this error is attributed to, if known.
    pub subsystem: Option<SubsystemName>,
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary contextual data.
    pub metadata: Value,
}

/// Given an arbitrary value plus context, produces a normalized
/// [`ErrorRecord`] (§4.11). Dispatch is tag-driven: a `"type"` field in the
/// input (or its absence) selects the [`ErrorType`] variant.
#[derive(Debug, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classifies `raw` (typically a `{success: false, type, message, ...}`
    /// failure shape) into an [`ErrorRecord`] attributed to `subsystem`.
    #[must_use]
    pub fn classify(&self, raw: &Value, subsystem: Option<SubsystemName>) -> ErrorRecord {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .map(ErrorType::from_tag)
            .unwrap_or(ErrorType::Simple);
        ErrorRecord {
            id: Uuid::new_v4(),
            kind,
            severity: Severity::from_type(kind),
            subsystem,
            timestamp: Utc::now(),
            metadata: raw.clone(),
        }
    }
}

/// Query filter for [`BoundedErrorStore::list`].
#[derive(Debug, Default, Clone)]
pub struct ErrorFilter {
    /// Restrict to this type, if set.
    pub error_type: Option<ErrorType>,
    /// Restrict to this severity, if set.
    pub severity: Option<Severity>,
    /// Restrict to this subsystem, if set.
    pub subsystem: Option<SubsystemName>,
    /// Restrict to records at or after this timestamp, if set.
    pub since: Option<DateTime<Utc>>,
    /// Cap the number of results returned.
    pub limit: Option<usize>,
}

/// Aggregate counts over a set of error records.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorSummary {
    /// Total records considered.
    pub total: usize,
    /// Count per [`ErrorType`].
    pub by_type: HashMap<ErrorType, usize>,
    /// Count per [`Severity`].
    pub by_severity: HashMap<Severity, usize>,
    /// Earliest timestamp considered, if any.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Latest timestamp considered, if any.
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// A fixed-capacity ring of [`ErrorRecord`]s with `drop-oldest` eviction,
/// O(1) add and by-id lookup (§4.11).
pub struct BoundedErrorStore {
    capacity: ErrorStoreCapacity,
    order: Mutex<VecDeque<Uuid>>,
    records: DashMap<Uuid, ErrorRecord>,
}

impl std::fmt::Debug for BoundedErrorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedErrorStore")
            .field("capacity", &self.capacity)
            .field("len", &self.records.len())
            .finish()
    }
}

impl BoundedErrorStore {
    /// Creates an empty store with the given capacity.
    #[must_use]
    pub fn new(capacity: ErrorStoreCapacity) -> Self {
        Self {
            capacity,
            order: Mutex::new(VecDeque::with_capacity(capacity.into_inner())),
            records: DashMap::new(),
        }
    }

    /// Adds a record, evicting the oldest if at capacity.
    pub fn add(&self, record: ErrorRecord) {
        let mut order = self.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if order.len() >= self.capacity.into_inner() {
            if let Some(oldest) = order.pop_front() {
                self.records.remove(&oldest);
            }
        }
        order.push_back(record.id);
        self.records.insert(record.id, record);
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<ErrorRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    /// Lists records matching `filter`, newest first.
    #[must_use]
    pub fn list(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let order = self.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut matched: Vec<ErrorRecord> = order
            .iter()
            .rev()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .filter(|r| filter.error_type.is_none_or(|t| t == r.kind))
            .filter(|r| filter.severity.is_none_or(|s| s == r.severity))
            .filter(|r| filter.subsystem.is_none() || filter.subsystem == r.subsystem)
            .filter(|r| filter.since.is_none_or(|since| r.timestamp >= since))
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// The `limit` most recently added records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        self.list(&ErrorFilter {
            limit: Some(limit),
            ..ErrorFilter::default()
        })
    }

    /// Aggregate counts, optionally restricted to records since `since`.
    #[must_use]
    pub fn summarize(&self, since: Option<DateTime<Utc>>) -> ErrorSummary {
        let records = self.list(&ErrorFilter {
            since,
            ..ErrorFilter::default()
        });
        let mut by_type = HashMap::new();
        let mut by_severity = HashMap::new();
        let mut first_timestamp = None;
        let mut last_timestamp = None;
        for record in &records {
            *by_type.entry(record.kind).or_insert(0) += 1;
            *by_severity.entry(record.severity).or_insert(0) += 1;
            first_timestamp = Some(first_timestamp.map_or(record.timestamp, |t: DateTime<Utc>| t.min(record.timestamp)));
            last_timestamp = Some(last_timestamp.map_or(record.timestamp, |t: DateTime<Utc>| t.max(record.timestamp)));
        }
        ErrorSummary {
            total: records.len(),
            by_type,
            by_severity,
            first_timestamp,
            last_timestamp,
        }
    }
}

/// Wraps an [`ErrorClassifier`] and a [`BoundedErrorStore`], exposing both
/// as method calls and as kernel message routes (§4.11, §6).
pub struct ErrorManagerSubsystem {
    classifier: ErrorClassifier,
    store: BoundedErrorStore,
    listeners: std::sync::RwLock<Option<Arc<dyn Facet>>>,
}

impl ErrorManagerSubsystem {
    /// Creates a service with the given ring capacity. No listeners facet is
    /// attached; use [`ErrorManagerSubsystem::set_listeners`] to wire one up,
    /// or build this facet through [`error_manager_hook`] which does so
    /// automatically from its `required` dependency.
    #[must_use]
    pub fn new(capacity: ErrorStoreCapacity) -> Arc<Self> {
        Arc::new(Self {
            classifier: ErrorClassifier,
            store: BoundedErrorStore::new(capacity),
            listeners: std::sync::RwLock::new(None),
        })
    }

    /// Attaches the listeners facet this service will broadcast
    /// `kernel://error/event/recorded` through on every [`Self::record`] call.
    pub fn set_listeners(&self, listeners: Arc<dyn Facet>) {
        *self.listeners.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(listeners);
    }

    /// Classifies and records `raw`, attributing it to `subsystem`, then
    /// emits `kernel://error/event/recorded` through the listeners facet (if
    /// attached) with the stored record as its body (§4.11).
    #[instrument(skip(self, raw))]
    pub fn record(&self, raw: &Value, subsystem: Option<SubsystemName>) -> ErrorRecord {
        let record = self.classifier.classify(raw, subsystem);
        self.store.add(record.clone());
        let listeners = self.listeners.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(listeners) = listeners {
            listeners.emit_event("kernel://error/event/recorded", json!(record));
        }
        record
    }

    /// The underlying bounded store, for direct queries.
    #[must_use]
    pub fn store(&self) -> &BoundedErrorStore {
        &self.store
    }

    /// Registers the kernel message routes `kernel://error/record/:type`,
    /// `…/query/recent`, `…/query/by-type/:type`, `…/query/summary` onto
    /// `router` (§6).
    pub fn register_routes(self: &Arc<Self>, router: &SubsystemRouter) {
        let record_self = Arc::clone(self);
        router.register_route(
            "error/record/:type",
            Arc::new(move |msg, params, _opts| {
                let mut body = msg.get_body().clone();
                if let Value::Object(ref mut map) = body {
                    map.entry("type").or_insert_with(|| json!(params.get("type")));
                }
                let record = record_self.record(&body, msg.get_meta().custom("subsystem").and_then(|v| v.as_str()).and_then(|s| SubsystemName::try_new(s.to_string()).ok()));
                json!({"success": true, "id": record.id.to_string()})
            }),
            None,
            Some("records a classified error".to_string()),
        );

        let recent_self = Arc::clone(self);
        router.register_route(
            "error/query/recent",
            Arc::new(move |_msg, _params, opts| {
                let limit = opts.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
                let records = recent_self.store().recent(limit);
                json!({"success": true, "records": records})
            }),
            None,
            Some("lists the most recent errors".to_string()),
        );

        let by_type_self = Arc::clone(self);
        router.register_route(
            "error/query/by-type/:type",
            Arc::new(move |_msg, params, opts| {
                let limit = opts.get("limit").and_then(Value::as_u64).map(|n| n as usize);
                let error_type = params.get("type").map(|t| ErrorType::from_tag(t));
                let records = by_type_self.store().list(&ErrorFilter {
                    error_type,
                    limit,
                    ..ErrorFilter::default()
                });
                json!({"success": true, "records": records})
            }),
            None,
            Some("lists errors of one type".to_string()),
        );

        let summary_self = Arc::clone(self);
        router.register_route(
            "error/query/summary",
            Arc::new(move |_msg, _params, _opts| {
                let summary = summary_self.store().summarize(None);
                json!({"success": true, "summary": summary})
            }),
            None,
            Some("aggregate error counts".to_string()),
        );
    }
}

impl std::fmt::Debug for ErrorManagerSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManagerSubsystem").finish_non_exhaustive()
    }
}

#[async_trait]
impl Facet for ErrorManagerSubsystem {
    fn kind(&self) -> FacetKind {
        FacetKind::try_new("error-manager".to_string()).unwrap_or_else(|_| unreachable!())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds the default `error-manager` hook, attached as `subsystem["error-manager"]`.
///
/// Depends on the `listeners` kind so the produced service can resolve it at
/// build time and broadcast `kernel://error/event/recorded` through it on
/// every recorded error (§4.11). A caller building a subsystem that includes
/// this hook must also include [`crate::listeners::listeners_hook`].
#[must_use]
pub fn error_manager_hook(capacity: ErrorStoreCapacity) -> Hook {
    let listeners_kind = FacetKind::try_new("listeners".to_string()).unwrap();
    let required_kind = listeners_kind.clone();
    let factory: HookFn = Arc::new(move |ctx: &FacetContext| {
        let manager = ErrorManagerSubsystem::new(capacity);
        if let Some(listeners) = ctx.find(&listeners_kind) {
            manager.set_listeners(listeners);
        }
        Ok(manager as Arc<dyn Facet>)
    });
    Hook::new(
        FacetKind::try_new("error-manager".to_string()).unwrap(),
        vec![required_kind],
        false,
        true,
        SourceId::try_new("kernel::error_manager".to_string()).unwrap(),
        factory,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> ErrorStoreCapacity {
        ErrorStoreCapacity::try_new(n).unwrap()
    }

    #[test]
    fn classify_maps_known_tags_to_error_types() {
        let classifier = ErrorClassifier;
        let record = classifier.classify(&json!({"type": "auth_failed"}), None);
        assert_eq!(record.kind, ErrorType::AuthFailed);
        assert_eq!(record.severity, Severity::Warn);
    }

    #[test]
    fn unknown_tag_classifies_as_simple() {
        let classifier = ErrorClassifier;
        let record = classifier.classify(&json!({"message": "oops"}), None);
        assert_eq!(record.kind, ErrorType::Simple);
    }

    #[test]
    fn store_evicts_oldest_beyond_capacity() {
        let store = BoundedErrorStore::new(cap(2));
        let classifier = ErrorClassifier;
        let a = classifier.classify(&json!({"type": "simple"}), None);
        let b = classifier.classify(&json!({"type": "simple"}), None);
        let c = classifier.classify(&json!({"type": "simple"}), None);
        let a_id = a.id;
        store.add(a);
        store.add(b);
        store.add(c);
        assert!(store.get(a_id).is_none());
        assert_eq!(store.recent(10).len(), 2);
    }

    #[test]
    fn list_filters_by_type_and_respects_limit() {
        let store = BoundedErrorStore::new(cap(10));
        let classifier = ErrorClassifier;
        store.add(classifier.classify(&json!({"type": "timeout"}), None));
        store.add(classifier.classify(&json!({"type": "auth_failed"}), None));
        store.add(classifier.classify(&json!({"type": "timeout"}), None));

        let timeouts = store.list(&ErrorFilter {
            error_type: Some(ErrorType::Timeout),
            ..ErrorFilter::default()
        });
        assert_eq!(timeouts.len(), 2);

        let limited = store.list(&ErrorFilter {
            limit: Some(1),
            ..ErrorFilter::default()
        });
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn summarize_counts_by_type_and_severity() {
        let store = BoundedErrorStore::new(cap(10));
        let classifier = ErrorClassifier;
        store.add(classifier.classify(&json!({"type": "timeout"}), None));
        store.add(classifier.classify(&json!({"type": "timeout"}), None));
        store.add(classifier.classify(&json!({"type": "internal"}), None));

        let summary = store.summarize(None);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_type[&ErrorType::Timeout], 2);
        assert_eq!(summary.by_type[&ErrorType::Internal], 1);
    }

    #[test]
    fn error_manager_subsystem_record_populates_the_store() {
        let manager = ErrorManagerSubsystem::new(cap(10));
        let record = manager.record(&json!({"type": "validation"}), None);
        assert_eq!(manager.store().get(record.id).unwrap().kind, ErrorType::Validation);
    }

    #[test]
    fn record_emits_through_an_attached_listeners_facet() {
        use crate::listeners::ListenersFacet;
        use std::sync::Mutex;

        let manager = ErrorManagerSubsystem::new(cap(10));
        let listeners = ListenersFacet::new();
        manager.set_listeners(Arc::clone(&listeners) as Arc<dyn Facet>);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_listener = Arc::clone(&seen);
        listeners.subscribe(Arc::new(move |msg| seen_for_listener.lock().unwrap().push(msg.get_path().to_string())));

        manager.record(&json!({"type": "internal"}), None);
        assert_eq!(seen.lock().unwrap().as_slice(), ["kernel://error/event/recorded"]);
    }

    #[test]
    fn record_without_listeners_attached_does_not_panic() {
        let manager = ErrorManagerSubsystem::new(cap(10));
        manager.record(&json!({"type": "internal"}), None);
        assert_eq!(manager.store().recent(10).len(), 1);
    }
}
