//! Facets and hooks (§3.1, §4.4).
//!
//! A [`Hook`] is a declarative factory: `{kind, required, overwrite, attach,
//! contract, fn}`. Its `fn` is executed once at build time with a
//! [`FacetContext`] and must produce a [`Facet`] whose `kind()` matches the
//! hook's declared kind. Facets expose lifecycle callbacks (`on_init`,
//! `dispose`) rather than a dynamic method table — Rust's trait objects are
//! the static analogue of the source's "method bundle".

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain_types::{FacetKind, SourceId, SubsystemName};
use crate::error::BuildError;

/// Context passed to a hook's factory function and to a facet's `on_init`.
///
/// Carries the owning subsystem's name and, once the build has begun, the
/// manager instance so a hook can resolve its `required` dependencies by
/// kind (§4.4 "Required deps: resolved via the registry at hook execution").
#[derive(Clone)]
pub struct FacetContext {
    /// Name of the subsystem this facet belongs to.
    pub subsystem: SubsystemName,
    /// Already-initialized facets available at the point this hook runs,
    /// keyed by kind, in insertion order.
    pub available: Arc<Vec<(FacetKind, Arc<dyn Facet>)>>,
}

impl FacetContext {
    /// Looks up an already-initialized facet by kind.
    #[must_use]
    pub fn find(&self, kind: &FacetKind) -> Option<Arc<dyn Facet>> {
        self.available
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, f)| Arc::clone(f))
    }
}

/// A capability bundle keyed by `kind`, produced by a [`Hook`] (§3.1).
///
/// Implementors use `as_any`/`Any` downcasting (the standard Rust idiom for a
/// heterogeneous registry of trait objects) when a caller needs the concrete
/// type behind a `find(kind)` lookup rather than only the lifecycle surface.
#[async_trait]
pub trait Facet: Send + Sync {
    /// The kind this facet is registered under.
    fn kind(&self) -> FacetKind;

    /// Called once, after all of this facet's `required` dependencies are
    /// attached, during a transactional build (§4.4).
    async fn on_init(&self, _ctx: &FacetContext) -> Result<(), BuildError> {
        Ok(())
    }

    /// Called during rollback of a failed build, or when the owning
    /// subsystem is torn down. Best-effort: implementors should not panic.
    async fn dispose(&self) {}

    /// Broadcasts `body` at `path` to this facet's subscribers. A no-op for
    /// every facet except [`crate::listeners::ListenersFacet`], which
    /// overrides it to fan out to its registered listeners — other facets
    /// that depend on a `listeners` kind call this without downcasting.
    fn emit_event(&self, _path: &str, _body: Value) {}

    /// Supports downcasting to a concrete facet type for callers that need
    /// more than the lifecycle surface.
    fn as_any(&self) -> &dyn Any;
}

/// A declarative factory that produces a [`Facet`] at build time (§3.1, §4.4).
pub struct Hook {
    /// The kind of facet this hook produces.
    pub kind: FacetKind,
    /// Kinds that must already be attached before this hook's factory runs.
    pub required: Vec<FacetKind>,
    /// If `true`, this hook may supersede an earlier hook declaring the same kind.
    pub overwrite: bool,
    /// If `true`, the resulting facet is exposed as `subsystem[kind]` after init.
    pub attach: bool,
    /// Optional contract identifier, for documentation/diagnostics only.
    pub contract: Option<String>,
    /// Identity of the code that declared this hook.
    pub source: SourceId,
    /// The factory function itself.
    pub factory: HookFn,
}

/// The type of a hook's factory function.
pub type HookFn = Arc<dyn Fn(&FacetContext) -> Result<Arc<dyn Facet>, BuildError> + Send + Sync>;

impl Hook {
    /// Builds a hook from its declaration and factory closure.
    #[must_use]
    pub fn new(
        kind: FacetKind,
        required: Vec<FacetKind>,
        overwrite: bool,
        attach: bool,
        source: SourceId,
        factory: HookFn,
    ) -> Self {
        Self {
            kind,
            required,
            overwrite,
            attach,
            contract: None,
            source,
            factory,
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("overwrite", &self.overwrite)
            .field("attach", &self.attach)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
