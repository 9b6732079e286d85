// logger.rs - Structured analytics logging, injected into each Manager.
//
// Generalizes the ad hoc `tracing::info!`/`tracing::warn!` call sites the
// teacher sprinkles through its command handlers into the fixed-key-prefix
// contract spec.md §6 requires.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Severity of an analytics event. `Severe` corresponds to the `Fail`
/// suffix events in spec.md §6; everything else is `Info` or `Analytic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Analytic,
    Severe,
}

/// One structured analytics event, as emitted by a Manager at a
/// well-defined point (listener attach/success/fail, calculate start/
/// success/fail, add/bulk-load/delete start/success/fail, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub name: String,
    pub parameters: serde_json::Value,
    pub severity: Severity,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value, severity: Severity) -> Self {
        Self {
            name: name.into(),
            parameters,
            severity,
        }
    }

    pub fn info(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self::new(name, parameters, Severity::Info)
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            name,
            serde_json::json!({ "error": message.into() }),
            Severity::Severe,
        )
    }
}

/// Analytics sink contract. The concrete sink (e.g. a vendor SDK) is an
/// external collaborator (spec.md §1); this crate only owns the contract
/// and a `tracing`-backed default implementation.
pub trait Logger: Send + Sync {
    fn log(&self, event: AnalyticsEvent);
}

/// Default logger: routes every event through `tracing`, using the
/// teacher's own choice of structured logging backend (`lib.rs` wires
/// `tracing-subscriber` with an env filter and JSON formatting).
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, event: AnalyticsEvent) {
        match event.severity {
            Severity::Severe => {
                tracing::error!(name = %event.name, parameters = %event.parameters, "analytics event")
            }
            Severity::Info | Severity::Analytic => {
                tracing::info!(name = %event.name, parameters = %event.parameters, "analytics event")
            }
        }
    }
}

/// Discards every event. Used in tests that don't want log noise.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _event: AnalyticsEvent) {}
}

pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

// Key prefixes, fixed by spec.md §6.
pub const STREAK_PREFIX: &str = "StreakMan_";
pub const XP_PREFIX: &str = "XPMan_";
pub const PROGRESS_PREFIX: &str = "ProgressMan_";
