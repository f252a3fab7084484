//! Event Row Model
//!
//! This module defines the `Event` type - the logical row stored in the
//! day-partitioned parquet lake.
//!
//! ## Structure
//!
//! Each event carries:
//! - **ts**: the UTC timestamp of the event
//! - **day / hour / minute**: calendar fields derived from `ts`
//! - **country / advertiser_id / publisher_id / user_id**: dimensions
//! - **event_type**: a closed enumeration (impression, click, serve, purchase)
//! - **bid_price / total_price**: numeric measures (`total_price` is only
//!   present on purchases, hence nullable)
//!
//! ## Invariants
//!
//! - `day`, `hour` and `minute` are always derivable from `ts`; rows where
//!   they disagree are invalid
//! - Partition directories use the canonical `YYYY-MM-DD` form produced by
//!   [`format_day`]; anything else is quarantined by the lake scanner
//! - `day`, `event_type` and `advertiser_id` are non-null key columns

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Canonical day format used for partition directories and date literals.
pub const CANONICAL_DAY_FMT: &str = "%Y-%m-%d";

/// Closed enumeration of event types.
///
/// The lake rejects rows outside this set; the validator treats any other
/// value as a data-quality failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Serve,
    Impression,
    Click,
    Purchase,
}

impl EventType {
    /// All valid wire names, in the order they appear in the source feed.
    pub const ALL: [EventType; 4] = [
        EventType::Serve,
        EventType::Impression,
        EventType::Click,
        EventType::Purchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Serve => "serve",
            EventType::Impression => "impression",
            EventType::Click => "click",
            EventType::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        match s {
            "serve" => Some(EventType::Serve),
            "impression" => Some(EventType::Impression),
            "click" => Some(EventType::Click),
            "purchase" => Some(EventType::Purchase),
            _ => None,
        }
    }
}

/// A single ad event in the lake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp (UTC)
    pub ts: DateTime<Utc>,

    /// Calendar day of `ts`, canonical `YYYY-MM-DD`
    pub day: NaiveDate,

    /// Hour of day, 0-23
    pub hour: u8,

    /// Minute of hour, 0-59
    pub minute: u8,

    /// ISO country code (short string, e.g. "JP")
    pub country: String,

    pub advertiser_id: i32,

    pub publisher_id: i32,

    pub user_id: i64,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Bid price for the auction, always present
    pub bid_price: f64,

    /// Purchase amount; only present on purchase events
    pub total_price: Option<f64>,
}

impl Event {
    /// Derive the calendar fields (`day`, `hour`, `minute`) from a timestamp.
    pub fn derive_time(ts: DateTime<Utc>) -> (NaiveDate, u8, u8) {
        (ts.date_naive(), ts.hour() as u8, ts.minute() as u8)
    }

    /// Check the day/hour/minute-derivable-from-ts invariant.
    pub fn time_fields_consistent(&self) -> bool {
        let (day, hour, minute) = Self::derive_time(self.ts);
        self.day == day && self.hour == hour && self.minute == minute
    }

    /// ISO week start for this event's day (Monday-based truncation).
    pub fn week(&self) -> NaiveDate {
        week_of(self.day)
    }
}

/// Monday-based week truncation, matching the engine's DATE_TRUNC('week', ..).
pub fn week_of(day: NaiveDate) -> NaiveDate {
    let back = day.weekday().num_days_from_monday() as i64;
    day - chrono::Duration::days(back)
}

/// Parse a day string in canonical `YYYY-MM-DD` form.
///
/// Stricter than chrono's default parsing: the input must be exactly ten
/// characters, zero-padded. `2024-1-05` and `2024-01-05T00:00` both fail.
pub fn parse_canonical_day(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(s, CANONICAL_DAY_FMT).ok()?;
    // Round-trip to reject non-padded forms that chrono accepts.
    if format_day(date) != s {
        return None;
    }
    Some(date)
}

/// Format a day in canonical `YYYY-MM-DD` form.
pub fn format_day(day: NaiveDate) -> String {
    day.format(CANONICAL_DAY_FMT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_derive_time() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 10, 14, 37, 2).unwrap();
        let (day, hour, minute) = Event::derive_time(ts);
        assert_eq!(format_day(day), "2025-09-10");
        assert_eq!(hour, 14);
        assert_eq!(minute, 37);
    }

    #[test]
    fn test_time_fields_consistent() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 10, 14, 37, 2).unwrap();
        let (day, hour, minute) = Event::derive_time(ts);
        let mut event = Event {
            ts,
            day,
            hour,
            minute,
            country: "JP".to_string(),
            advertiser_id: 7,
            publisher_id: 12,
            user_id: 100_001,
            event_type: EventType::Impression,
            bid_price: 0.42,
            total_price: None,
        };
        assert!(event.time_fields_consistent());

        event.hour = 3;
        assert!(!event.time_fields_consistent());
    }

    #[test]
    fn test_canonical_day_parsing() {
        assert_eq!(
            parse_canonical_day("2024-01-05"),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        // Non-canonical forms are rejected outright.
        assert_eq!(parse_canonical_day("2024-1-05"), None);
        assert_eq!(parse_canonical_day("2024-01-05 08:00:00"), None);
        assert_eq!(parse_canonical_day("20240105"), None);
        assert_eq!(parse_canonical_day("2024-13-01"), None);
    }

    #[test]
    fn test_week_truncation() {
        // 2025-09-10 is a Wednesday; its week starts Monday 2025-09-08.
        let day = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        assert_eq!(format_day(week_of(day)), "2025-09-08");
        // A Monday truncates to itself.
        let monday = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        assert_eq!(week_of(monday), monday);
    }

    #[test]
    fn test_event_type_round_trip() {
        for t in EventType::ALL {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EventType::parse("install"), None);
    }

    #[test]
    fn test_event_type_serde_rename() {
        let json = serde_json::to_string(&EventType::Impression).unwrap();
        assert_eq!(json, "\"impression\"");
    }
}
