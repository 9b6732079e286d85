// calculators/xp.rs - Deterministic experience-points aggregation (spec.md §4.2)

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::XPConfiguration;
use crate::model::{CurrentXPData, Metadata, MetadataValue, XPEvent};

const RECENT_WINDOW_DAYS: i64 = 60;

fn local_date(timestamp: DateTime<Utc>, user_zone: Tz) -> chrono::NaiveDate {
    timestamp.with_timezone(&user_zone).date_naive()
}

/// Sunday-anchored start of the calendar week containing `day`.
fn start_of_week(day: chrono::NaiveDate) -> chrono::NaiveDate {
    let days_since_sunday = day.weekday().num_days_from_sunday();
    day - Duration::days(days_since_sunday as i64)
}

/// `calculateXP(events, configuration, now, userZone) → CurrentXPData` (spec.md §4.2).
///
/// Window definitions, all anchored on `now`'s local calendar day:
///   today          = same local day as now
///   thisWeek       = [startOfWeek(now), now], week starts Sunday
///   last7Days      = [now − 7d, now]
///   thisMonth      = [firstOfMonth(now), now]
///   last30Days     = [now − 30d, now]
///   thisYear       = [firstOfYear(now), now]
///   last12Months   = [now − 365d, now]
pub fn calculate_xp(events: &[XPEvent], config: &XPConfiguration, now: DateTime<Utc>, user_zone: Tz) -> CurrentXPData {
    let today = local_date(now, user_zone);
    let week_start = start_of_week(today);
    let month_start = today.with_day(1).unwrap_or(today);
    let year_start = today.with_ordinal(1).unwrap_or(today);

    let mut data = CurrentXPData::blank(config.experience_key.clone());

    let mut points_today = 0u64;
    let mut events_today_count = 0u64;
    let mut points_this_week = 0u64;
    let mut points_last_7_days = 0u64;
    let mut points_this_month = 0u64;
    let mut points_last_30_days = 0u64;
    let mut points_this_year = 0u64;
    let mut points_last_12_months = 0u64;

    for event in events {
        let day = local_date(event.timestamp, user_zone);
        let points = event.points.max(0) as u64;

        if day == today {
            points_today += points;
            events_today_count += 1;
        }
        if day >= week_start && day <= today {
            points_this_week += points;
        }
        if event.timestamp >= now - Duration::days(7) {
            points_last_7_days += points;
        }
        if day >= month_start && day <= today {
            points_this_month += points;
        }
        if event.timestamp >= now - Duration::days(30) {
            points_last_30_days += points;
        }
        if day >= year_start && day <= today {
            points_this_year += points;
        }
        if event.timestamp >= now - Duration::days(365) {
            points_last_12_months += points;
        }
    }

    let date_last_event = events.iter().map(|e| e.timestamp).max();
    let date_created = events.iter().map(|e| e.timestamp).min();

    let recent_cutoff = today - Duration::days(RECENT_WINDOW_DAYS);
    let mut recent: Vec<XPEvent> = events
        .iter()
        .filter(|e| {
            let day = local_date(e.timestamp, user_zone);
            day >= recent_cutoff && day <= today
        })
        .cloned()
        .collect();
    recent.sort_by_key(|e| e.timestamp);

    data.points_today = points_today;
    data.events_today_count = events_today_count;
    data.points_this_week = points_this_week;
    data.points_last_7_days = points_last_7_days;
    data.points_this_month = points_this_month;
    data.points_last_30_days = points_last_30_days;
    data.points_this_year = points_this_year;
    data.points_last_12_months = points_last_12_months;
    data.date_last_event = date_last_event;
    data.date_created = date_created;
    data.date_updated = Some(now);
    data.recent_events = Some(recent);

    data
}

/// Sums `points` across every event whose metadata has `field == value`,
/// regardless of time window. A free function rather than a Manager method
/// since it needs no collaborators beyond the event log already fetched.
pub fn get_total_points_for_metadata(events: &[XPEvent], field: &str, value: &MetadataValue) -> u64 {
    events
        .iter()
        .filter(|e| metadata_matches(&e.metadata, field, value))
        .map(|e| e.points.max(0) as u64)
        .sum()
}

fn metadata_matches(metadata: &Metadata, field: &str, value: &MetadataValue) -> bool {
    metadata.get(field).map(|v| v == value).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;
    use std::collections::HashMap;

    fn ev(id: &str, ts: &str, points: i64) -> XPEvent {
        XPEvent {
            id: id.to_string(),
            timestamp: ts.parse().unwrap(),
            timezone: "UTC".to_string(),
            metadata: HashMap::new(),
            experience_key: "reading".to_string(),
            points,
        }
    }

    fn config() -> XPConfiguration {
        XPConfiguration::new("reading")
    }

    #[test]
    fn scenario_4_month_boundary_windows() {
        // "now" sits on the first day of July; a late-June event should
        // count toward last30Days/last7Days but drop out of thisMonth.
        let now: DateTime<Utc> = "2025-07-01T12:00:00Z".parse().unwrap();
        let events = vec![
            ev("june-event", "2025-06-29T10:00:00Z", 50),
            ev("july-event", "2025-07-01T08:00:00Z", 20),
        ];
        let data = calculate_xp(&events, &config(), now, UTC);

        assert_eq!(data.points_today, 20);
        assert_eq!(data.points_this_month, 20);
        assert_eq!(data.points_last_30_days, 70);
        assert_eq!(data.points_last_7_days, 70);
    }

    #[test]
    fn week_window_anchors_on_sunday() {
        // 2025-06-15 is a Sunday.
        let now: DateTime<Utc> = "2025-06-17T12:00:00Z".parse().unwrap();
        let events = vec![
            ev("sun", "2025-06-15T10:00:00Z", 10),
            ev("sat-before", "2025-06-14T10:00:00Z", 999),
        ];
        let data = calculate_xp(&events, &config(), now, UTC);
        assert_eq!(data.points_this_week, 10);
    }

    #[test]
    fn year_window_resets_on_january_first() {
        let now: DateTime<Utc> = "2025-01-05T12:00:00Z".parse().unwrap();
        let events = vec![
            ev("this-year", "2025-01-02T10:00:00Z", 5),
            ev("last-year", "2024-12-30T10:00:00Z", 500),
        ];
        let data = calculate_xp(&events, &config(), now, UTC);
        assert_eq!(data.points_this_year, 5);
        assert_eq!(data.points_last_12_months, 505);
    }

    #[test]
    fn total_for_metadata_field_sums_matching_events() {
        let mut a = ev("a", "2025-06-01T00:00:00Z", 10);
        a.metadata.insert("category".to_string(), MetadataValue::String("math".to_string()));
        let mut b = ev("b", "2025-06-02T00:00:00Z", 20);
        b.metadata.insert("category".to_string(), MetadataValue::String("math".to_string()));
        let mut c = ev("c", "2025-06-03T00:00:00Z", 30);
        c.metadata.insert("category".to_string(), MetadataValue::String("reading".to_string()));

        let total = get_total_points_for_metadata(
            &[a, b, c],
            "category",
            &MetadataValue::String("math".to_string()),
        );
        assert_eq!(total, 30);
    }

    #[test]
    fn no_events_yields_blank_xp() {
        let data = calculate_xp(&[], &config(), "2025-06-15T12:00:00Z".parse().unwrap(), UTC);
        assert_eq!(data.points_today, 0);
        assert!(data.date_last_event.is_none());
        assert!(data.recent_events.unwrap().is_empty());
    }
}
