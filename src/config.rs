// config.rs - Per-projection configuration and key sanitization (spec.md §3)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static COLLAPSE_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").unwrap());

/// Sanitize an arbitrary product-supplied key into the canonical form:
/// lowercase, alphanumeric-or-`_`, no leading/trailing/consecutive `_`.
/// Reduces to `"item"` when the input collapses to nothing (spec.md §3).
pub fn sanitize_key(input: &str) -> String {
    let lowered = input.to_lowercase();
    let replaced = NON_ALNUM.replace_all(&lowered, "_");
    let collapsed = COLLAPSE_UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

/// True iff `key` is already in sanitized form (spec.md §3's sanitization
/// rule, stated as an equality check rather than re-deriving the regex at
/// every call site).
pub fn is_sanitized(key: &str) -> bool {
    !key.is_empty() && sanitize_key(key) == key
}

fn require_sanitized(key: &str, field: &str) -> Result<()> {
    if is_sanitized(key) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{field} '{key}' is not sanitized (expected '{}')",
            sanitize_key(key)
        )))
    }
}

/// Behavior when a qualifying day is missing from the current-streak walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeBehavior {
    None,
    AutoConsume,
    ManualConsume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakConfiguration {
    pub streak_key: String,
    pub events_required_per_day: u32,
    pub use_server_calculation: bool,
    pub leeway_hours: u32,
    pub freeze_behavior: FreezeBehavior,
}

impl StreakConfiguration {
    pub fn new(streak_key: impl Into<String>) -> Self {
        Self {
            streak_key: streak_key.into(),
            events_required_per_day: 1,
            use_server_calculation: false,
            leeway_hours: 0,
            freeze_behavior: FreezeBehavior::None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_sanitized(&self.streak_key, "streakKey")?;
        if self.events_required_per_day < 1 {
            return Err(Error::Validation(
                "eventsRequiredPerDay must be >= 1".to_string(),
            ));
        }
        if self.leeway_hours > 24 {
            return Err(Error::Validation(
                "leewayHours must be in [0, 24]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XPConfiguration {
    pub experience_key: String,
    pub use_server_calculation: bool,
}

impl XPConfiguration {
    pub fn new(experience_key: impl Into<String>) -> Self {
        Self {
            experience_key: experience_key.into(),
            use_server_calculation: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_sanitized(&self.experience_key, "experienceKey")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfiguration {
    pub progress_key: String,
}

impl ProgressConfiguration {
    pub fn new(progress_key: impl Into<String>) -> Self {
        Self {
            progress_key: progress_key.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_sanitized(&self.progress_key, "progressKey")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(sanitize_key("My Streak!!"), "my_streak");
        assert_eq!(sanitize_key("__leading__trailing__"), "leading_trailing");
        assert_eq!(sanitize_key("a___b"), "a_b");
    }

    #[test]
    fn sanitize_empty_input_yields_item() {
        assert_eq!(sanitize_key("   "), "item");
        assert_eq!(sanitize_key("___"), "item");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["Daily Habit", "streak_key", "___", "a-b-c"] {
            let once = sanitize_key(input);
            let twice = sanitize_key(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn is_sanitized_matches_precondition() {
        assert!(is_sanitized("daily_habit"));
        assert!(!is_sanitized("Daily Habit"));
        assert!(!is_sanitized(""));
    }

    #[test]
    fn streak_configuration_validates_bounds() {
        let mut cfg = StreakConfiguration::new("reading");
        cfg.events_required_per_day = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreakConfiguration::new("reading");
        cfg.leeway_hours = 25;
        assert!(cfg.validate().is_err());

        let cfg = StreakConfiguration::new("Reading");
        assert!(cfg.validate().is_err());
    }
}
