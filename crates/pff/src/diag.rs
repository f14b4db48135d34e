//! Structured diagnostics.
//!
//! Non-fatal anomalies (tolerated corruption, recovery collisions, skipped
//! cells) are reported through a sink supplied at open time. The default sink
//! forwards to `tracing`; formatting is the subscriber's job.

use std::fmt;

/// One structured event. `domain` names the layer that noticed the condition
/// and `name` identifies the condition itself; `detail` carries the values.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub domain: &'static str,
    pub name: &'static str,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(domain: &'static str, name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            domain,
            name,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.domain, self.name, self.detail)
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, event: &Diagnostic);
}

/// Forwards every event to a `tracing` warning.
#[derive(Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, event: &Diagnostic) {
        tracing::warn!(
            name: "PffDiagnostic",
            domain = event.domain,
            event = event.name,
            detail = %event.detail,
            "{event}"
        );
    }
}

/// Discards every event.
#[derive(Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _event: &Diagnostic) {}
}
