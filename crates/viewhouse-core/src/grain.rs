//! Materialized-view grain lattice.
//!
//! A grain is the time bucket an MV is aggregated at. Grains form a total
//! order by fineness; a finer grain can always be rolled up into a coarser
//! one because its key columns carry the coarser key (hour rows carry `day`,
//! day rows can be truncated to `week`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grain {
    AllTime,
    Week,
    Day,
    Hour,
    Minute,
}

impl Grain {
    /// Fineness rank; higher is finer.
    fn fineness(&self) -> u8 {
        match self {
            Grain::AllTime => 0,
            Grain::Week => 1,
            Grain::Day => 2,
            Grain::Hour => 3,
            Grain::Minute => 4,
        }
    }

    /// Natural key columns for this grain, finest-last.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Grain::AllTime => &[],
            Grain::Week => &["week"],
            Grain::Day => &["day"],
            Grain::Hour => &["day", "hour"],
            Grain::Minute => &["day", "hour", "minute"],
        }
    }

    /// Whether rows at this grain can serve a query at `target` grain,
    /// either directly (equal) or by reaggregation (finer).
    pub fn can_serve(&self, target: Grain) -> bool {
        self.fineness() >= target.fineness()
    }

    pub fn is_finer_than(&self, other: Grain) -> bool {
        self.fineness() > other.fineness()
    }

    /// Derive the grain a query requires from its grouping columns.
    /// Grouping by `minute` implies minute buckets, and so on; no time
    /// column means an all-time aggregate.
    pub fn required_by(group_by: &[String]) -> Grain {
        let has = |c: &str| group_by.iter().any(|g| g == c);
        if has("minute") {
            Grain::Minute
        } else if has("hour") {
            Grain::Hour
        } else if has("day") {
            Grain::Day
        } else if has("week") {
            Grain::Week
        } else {
            Grain::AllTime
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grain::AllTime => "all-time",
            Grain::Week => "week",
            Grain::Day => "day",
            Grain::Hour => "hour",
            Grain::Minute => "minute",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_serve_is_fineness_order() {
        assert!(Grain::Hour.can_serve(Grain::Day));
        assert!(Grain::Hour.can_serve(Grain::Week));
        assert!(Grain::Day.can_serve(Grain::AllTime));
        assert!(Grain::Day.can_serve(Grain::Day));
        assert!(!Grain::Week.can_serve(Grain::Day));
        assert!(!Grain::AllTime.can_serve(Grain::Week));
    }

    #[test]
    fn test_required_grain_from_group_by() {
        let g = |cols: &[&str]| {
            Grain::required_by(&cols.iter().map(|c| c.to_string()).collect::<Vec<_>>())
        };
        assert_eq!(g(&["day", "country"]), Grain::Day);
        assert_eq!(g(&["day", "hour"]), Grain::Hour);
        assert_eq!(g(&["minute", "day"]), Grain::Minute);
        assert_eq!(g(&["week"]), Grain::Week);
        assert_eq!(g(&["advertiser_id", "type"]), Grain::AllTime);
        assert_eq!(g(&[]), Grain::AllTime);
    }

    #[test]
    fn test_serde_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Grain::AllTime).unwrap(),
            "\"all-time\""
        );
        let g: Grain = serde_json::from_str("\"hour\"").unwrap();
        assert_eq!(g, Grain::Hour);
    }
}
