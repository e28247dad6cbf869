//! Tracing subscriber initialization (§6.1).
//!
//! The core never wires a subscriber itself; every span/event it emits
//! (build begin/commit/rollback, facet init/dispose, slice grant, message
//! accept/process/error, `sendProtected` allow/deny, timeout firing, error
//! recorded) simply goes nowhere until an embedding binary installs one.
//! `init_tracing` is that installation, offered for binaries that want a
//! reasonable default rather than hand-rolling `tracing-subscriber`
//! boilerplate themselves.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::EnvFilter;

/// Output shape for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable, ANSI-colored, suited to interactive development.
    Pretty,
    /// Newline-delimited JSON, suited to log aggregation in production.
    Json,
}

/// Installs a global [`tracing`] subscriber, honoring `RUST_LOG` when set
/// and falling back to `facetkernel=debug,warn` otherwise. Never invoked
/// implicitly by library code — only by binaries (§6.1, §6.2).
///
/// Returns `Err` if a global subscriber was already installed.
pub fn init_tracing(format: TracingFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facetkernel=debug,warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    match format {
        TracingFormat::Pretty => builder.with_ansi(true).try_init(),
        TracingFormat::Json => builder.json().try_init(),
    }
}
