// model.rs - Data model shared by all three projections (spec.md §3)

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

static METADATA_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// A tagged scalar metadata value, wire-encoded as `{type, value}` (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetadataValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
}

pub type Metadata = HashMap<String, MetadataValue>;

fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for key in metadata.keys() {
        if !METADATA_KEY.is_match(key) {
            return Err(Error::Validation(format!(
                "metadata key '{key}' must match ^[A-Za-z0-9_]+$"
            )));
        }
    }
    Ok(())
}

/// Validates the common `Event` shape invariant: `oneYearAgo <= timestamp <= now`.
pub fn validate_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    let one_year_ago = now - Duration::days(365);
    if timestamp > now {
        return Err(Error::Validation("timestamp is in the future".to_string()));
    }
    if timestamp < one_year_ago {
        return Err(Error::Validation(
            "timestamp is older than one year".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_timezone(tz: &str) -> Result<Tz> {
    tz.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("'{tz}' is not a valid IANA timezone")))
}

/// A single record in a streak's append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub timezone: String,
    pub metadata: Metadata,
    pub is_freeze: bool,
    pub freeze_id: Option<String>,
}

impl StreakEvent {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("event id must not be empty".to_string()));
        }
        validate_timestamp(self.timestamp, now)?;
        validate_timezone(&self.timezone)?;
        validate_metadata(&self.metadata)
    }
}

/// A single record in an experience-points event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XPEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub timezone: String,
    pub metadata: Metadata,
    pub experience_key: String,
    pub points: i64,
}

impl XPEvent {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("event id must not be empty".to_string()));
        }
        if self.points < 0 {
            return Err(Error::Validation("points must be >= 0".to_string()));
        }
        validate_timestamp(self.timestamp, now)?;
        validate_timezone(&self.timezone)?;
        validate_metadata(&self.metadata)
    }
}

/// A freeze token that can bridge a missing qualifying day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakFreeze {
    pub id: String,
    pub date_earned: Option<DateTime<Utc>>,
    pub date_used: Option<DateTime<Utc>>,
    pub date_expires: Option<DateTime<Utc>>,
}

impl StreakFreeze {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.date_used.is_none() && self.date_expires.map(|exp| exp > now).unwrap_or(true)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(used), Some(earned)) = (self.date_used, self.date_earned) {
            if used < earned {
                return Err(Error::Validation(
                    "dateUsed must be >= dateEarned".to_string(),
                ));
            }
        }
        if let (Some(expires), Some(earned)) = (self.date_expires, self.date_earned) {
            if expires < earned {
                return Err(Error::Validation(
                    "dateExpires must be >= dateEarned".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The streak projection's aggregate (spec.md §3/§4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentStreakData {
    pub streak_key: String,
    pub user_id: Option<String>,
    pub current_streak: Option<u32>,
    pub longest_streak: Option<u32>,
    pub date_last_event: Option<DateTime<Utc>>,
    /// The most recent *qualifying* day (spec.md §4.1's "anchor"), used only
    /// to derive `isStreakActive`/`isStreakAtRisk`/`freezesNeededToSaveStreak`.
    /// Distinct from `date_last_event`, which stays the raw max timestamp
    /// over all non-freeze events even when today's activity hasn't met the
    /// day's goal yet.
    pub date_last_qualifying_day: Option<DateTime<Utc>>,
    pub last_event_timezone: Option<String>,
    pub date_streak_start: Option<DateTime<Utc>>,
    pub total_events: Option<u64>,
    pub freezes_available: Option<Vec<StreakFreeze>>,
    pub freezes_available_count: Option<u32>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
    pub events_required_per_day: Option<u32>,
    pub today_event_count: Option<u32>,
    pub recent_events: Option<Vec<StreakEvent>>,
}

impl CurrentStreakData {
    /// The blank aggregate for a streak key (spec.md §8 "logout purity").
    pub fn blank(streak_key: impl Into<String>) -> Self {
        Self {
            streak_key: streak_key.into(),
            current_streak: Some(0),
            longest_streak: Some(0),
            total_events: Some(0),
            freezes_available_count: Some(0),
            today_event_count: Some(0),
            recent_events: Some(Vec::new()),
            ..Default::default()
        }
    }

    /// Days since the most recent *qualifying* day, not the raw
    /// `date_last_event` timestamp — a partial, goal-unmet day today must
    /// not read as "active" off an event that didn't complete the streak.
    fn days_since_last_qualifying_day(&self, now: DateTime<Utc>) -> Option<i64> {
        self.date_last_qualifying_day
            .map(|last| (now.date_naive() - last.date_naive()).num_days())
    }

    /// `isStreakActive ⇔ daysSinceLastEvent ≤ 1`
    pub fn is_streak_active(&self, now: DateTime<Utc>) -> bool {
        self.days_since_last_qualifying_day(now).map(|d| d <= 1).unwrap_or(false)
    }

    /// `isStreakAtRisk ⇔ daysSinceLastEvent = 1`
    pub fn is_streak_at_risk(&self, now: DateTime<Utc>) -> bool {
        self.days_since_last_qualifying_day(now).map(|d| d == 1).unwrap_or(false)
    }

    /// `isDataStale ⇔ dateUpdated absent OR (now − dateUpdated) ≥ 1 hour`
    pub fn is_data_stale(&self, now: DateTime<Utc>) -> bool {
        match self.date_updated {
            None => true,
            Some(updated) => (now - updated) >= Duration::hours(1),
        }
    }

    /// `freezesNeededToSaveStreak = max(0, daysSinceLastEvent − 1)`
    pub fn freezes_needed_to_save_streak(&self, now: DateTime<Utc>) -> u32 {
        match self.days_since_last_qualifying_day(now) {
            Some(d) if d > 1 => (d - 1) as u32,
            _ => 0,
        }
    }

    /// `canStreakBeSaved ⇔ freezesAvailableCount ≥ freezesNeededToSaveStreak`
    pub fn can_streak_be_saved(&self, now: DateTime<Utc>) -> bool {
        self.freezes_available_count.unwrap_or(0) >= self.freezes_needed_to_save_streak(now)
    }

    /// `goalProgress = min(todayEventCount / eventsRequiredPerDay, 1.0)`
    pub fn goal_progress(&self) -> f64 {
        let required = self.events_required_per_day.unwrap_or(1).max(1);
        let today = self.today_event_count.unwrap_or(0);
        (today as f64 / required as f64).min(1.0)
    }

    /// `isGoalMet ⇔ todayEventCount ≥ eventsRequiredPerDay`
    pub fn is_goal_met(&self) -> bool {
        let required = self.events_required_per_day.unwrap_or(1).max(1);
        self.today_event_count.unwrap_or(0) >= required
    }
}

/// The experience-points projection's aggregate (spec.md §3/§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentXPData {
    pub experience_key: String,
    pub user_id: Option<String>,
    pub points_today: u64,
    pub events_today_count: u64,
    pub points_this_week: u64,
    pub points_last_7_days: u64,
    pub points_this_month: u64,
    pub points_last_30_days: u64,
    pub points_this_year: u64,
    pub points_last_12_months: u64,
    pub date_last_event: Option<DateTime<Utc>>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
    pub recent_events: Option<Vec<XPEvent>>,
}

impl CurrentXPData {
    pub fn blank(experience_key: impl Into<String>) -> Self {
        Self {
            experience_key: experience_key.into(),
            recent_events: Some(Vec::new()),
            ..Default::default()
        }
    }
}

/// A single progress item. Composite identity is `progressKey + "_" + id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressItem {
    pub id: String,
    pub progress_key: String,
    pub value: f64,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

impl ProgressItem {
    pub fn composite_id(&self) -> String {
        format!("{}_{}", self.progress_key, self.id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("progress id must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.value) {
            return Err(Error::Validation(
                "progress value must be in [0.0, 1.0]".to_string(),
            ));
        }
        validate_metadata(&self.metadata)
    }
}
