// lib.rs - Main library entry point
//
// Client-side gamification state engine: three independent per-user
// aggregate projections (streaks, experience points, progress items),
// each backed by an append-only remote event log and a local cache.

pub mod calculators;
pub mod config;
pub mod error;
pub mod logger;
pub mod managers;
pub mod model;
pub mod persistence;
pub mod remote;

pub use config::{FreezeBehavior, ProgressConfiguration, StreakConfiguration, XPConfiguration};
pub use error::{Error, Result};
pub use logger::{AnalyticsEvent, Logger, Severity};
pub use managers::{ExperiencePointsManager, ProgressChange, ProgressManager, StreakManager};
pub use model::{
    CurrentStreakData, CurrentXPData, Metadata, MetadataValue, ProgressItem, StreakEvent, StreakFreeze, XPEvent,
};
pub use persistence::LocalPersistence;
pub use remote::{ProgressRemote, StreakRemote, XPRemote};

/// Installs a JSON-formatted `tracing` subscriber honoring `RUST_LOG`,
/// falling back to `info` when unset. Mirrors the teacher's choice of
/// structured logging backend, generalized from its Tauri log plugin to a
/// plain library entry point.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().json().with_env_filter(filter).try_init();
}
