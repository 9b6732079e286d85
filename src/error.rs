// error.rs - Centralized error handling using thiserror

use serde::{Deserialize, Serialize};

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the gamification engine.
///
/// Mirrors the three classes spec.md §7 describes: validation errors are
/// raised synchronously and never retried, business errors are distinguishable
/// so callers can present targeted prompts, and system/transient errors wrap
/// the underlying remote/local failures. All variants are serializable so
/// they can cross a process boundary the same way a Tauri command error does.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "message")]
pub enum Error {
    // --- Validation (§7.1) ---
    #[error("validation error: {0}")]
    Validation(String),

    // --- Business (§7.2) ---
    #[error("not logged in")]
    NotLoggedIn,

    #[error("no streak found")]
    NoStreakFound,

    #[error("no events recorded")]
    NoEventsRecorded,

    #[error("freeze not available: {0}")]
    FreezeNotAvailable(String),

    #[error("freeze already used: {0}")]
    FreezeAlreadyUsed(String),

    // --- System / transient (§7.3) ---
    #[error("local persistence error: {0}")]
    Database(String),

    #[error("remote service error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
