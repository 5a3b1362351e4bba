use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use time::{Duration, OffsetDateTime, Time};

use super::Activity;

/// Named time window used by the list and search screens.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Bucket {
    Passed,
    #[default]
    Upcoming,
    Today,
    Tomorrow,
    Weekend,
}

impl Bucket {
    /// Unknown names fall back to [`Bucket::Upcoming`].
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or_default()
    }
}

/// Every bucket boundary, derived from one captured instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWindow {
    pub now: OffsetDateTime,
    pub start_of_today: OffsetDateTime,
    pub start_of_tomorrow: OffsetDateTime,
    pub end_of_tomorrow: OffsetDateTime,
    pub weekend_start: OffsetDateTime,
    pub weekend_end: OffsetDateTime,
}

impl BucketWindow {
    /// Day boundaries are midnights in `now`'s own offset. The weekend is the
    /// 48 hours from the coming Saturday 00:00, which is today when `now` is
    /// already a Saturday.
    pub fn at(now: OffsetDateTime) -> Self {
        let start_of_today = now.replace_time(Time::MIDNIGHT);
        let start_of_tomorrow = start_of_today + Duration::hours(24);
        let end_of_tomorrow = start_of_today + Duration::hours(48);
        let days_to_saturday = 6 - i64::from(now.weekday().number_days_from_sunday());
        let weekend_start = start_of_today + Duration::days(days_to_saturday);
        Self {
            now,
            start_of_today,
            start_of_tomorrow,
            end_of_tomorrow,
            weekend_start,
            weekend_end: weekend_start + Duration::hours(48),
        }
    }

    pub fn contains(&self, bucket: Bucket, instant: OffsetDateTime) -> bool {
        match bucket {
            Bucket::Passed => instant < self.now,
            Bucket::Upcoming => instant >= self.now,
            Bucket::Today => instant >= self.start_of_today && instant < self.start_of_tomorrow,
            Bucket::Tomorrow => {
                instant >= self.start_of_tomorrow && instant < self.end_of_tomorrow
            }
            Bucket::Weekend => instant >= self.weekend_start && instant < self.weekend_end,
        }
    }
}

/// Keeps the activities whose start falls in `bucket`, in their original order.
/// Activities with an unparseable date are never kept.
pub fn filter_by_date(activities: &[Activity], bucket: Bucket, now: OffsetDateTime) -> Vec<Activity> {
    let window = BucketWindow::at(now);
    activities
        .iter()
        .filter(|activity| {
            activity
                .starts_at()
                .is_some_and(|start| window.contains(bucket, start))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::sample;
    use strum::IntoEnumIterator;
    use time::macros::datetime;

    // Wednesday afternoon.
    const NOW: OffsetDateTime = datetime!(2024-10-16 15:00 UTC);

    fn ids(activities: &[Activity]) -> Vec<&str> {
        activities.iter().map(|a| a.id.as_str()).collect()
    }

    fn fixture() -> Vec<Activity> {
        vec![
            sample("yesterday", "Board games", "2024-10-15T19:00:00Z"),
            sample("this-morning", "Coffee", "2024-10-16T08:00:00Z"),
            sample("tonight", "Trivia", "2024-10-16T20:00:00Z"),
            sample("tomorrow", "Run club", "2024-10-17T07:00:00.000Z"),
            sample("friday", "Drinks", "2024-10-18T21:00:00Z"),
            sample("saturday", "Hike", "2024-10-19T09:00:00Z"),
            sample("sunday-late", "Brunch", "2024-10-20T23:59:00Z"),
            sample("next-monday", "Book club", "2024-10-21T00:00:00Z"),
            sample("broken", "Mystery", "someday soon"),
        ]
    }

    #[test]
    fn upcoming_keeps_future_in_order() {
        let out = filter_by_date(&fixture(), Bucket::Upcoming, NOW);
        assert_eq!(
            ids(&out),
            vec!["tonight", "tomorrow", "friday", "saturday", "sunday-late", "next-monday"]
        );
    }

    #[test]
    fn passed_is_strictly_before_now() {
        let mut activities = fixture();
        activities.push(sample("exactly-now", "Edge", "2024-10-16T15:00:00Z"));
        let out = filter_by_date(&activities, Bucket::Passed, NOW);
        assert_eq!(ids(&out), vec!["yesterday", "this-morning"]);
        let upcoming = filter_by_date(&activities, Bucket::Upcoming, NOW);
        assert!(ids(&upcoming).contains(&"exactly-now"));
    }

    #[test]
    fn today_includes_earlier_events_of_the_day() {
        let out = filter_by_date(&fixture(), Bucket::Today, NOW);
        assert_eq!(ids(&out), vec!["this-morning", "tonight"]);
    }

    #[test]
    fn tomorrow_is_the_next_calendar_day() {
        let out = filter_by_date(&fixture(), Bucket::Tomorrow, NOW);
        assert_eq!(ids(&out), vec!["tomorrow"]);
    }

    #[test]
    fn today_and_tomorrow_are_disjoint_within_two_days() {
        let activities = fixture();
        let today = filter_by_date(&activities, Bucket::Today, NOW);
        let tomorrow = filter_by_date(&activities, Bucket::Tomorrow, NOW);
        let window = BucketWindow::at(NOW);
        for activity in &today {
            assert!(!tomorrow.iter().any(|other| other.id == activity.id));
        }
        for activity in today.iter().chain(tomorrow.iter()) {
            let start = activity.starts_at().expect("parseable");
            assert!(start >= window.start_of_today && start < window.end_of_tomorrow);
        }
    }

    #[test]
    fn weekend_covers_saturday_and_sunday() {
        let out = filter_by_date(&fixture(), Bucket::Weekend, NOW);
        assert_eq!(ids(&out), vec!["saturday", "sunday-late"]);
    }

    #[test]
    fn weekend_on_saturday_starts_today() {
        let window = BucketWindow::at(datetime!(2024-10-19 22:00 UTC));
        assert_eq!(window.weekend_start, datetime!(2024-10-19 00:00 UTC));
        assert_eq!(window.weekend_end, datetime!(2024-10-21 00:00 UTC));
    }

    #[test]
    fn weekend_on_sunday_points_at_next_saturday() {
        let window = BucketWindow::at(datetime!(2024-10-20 10:00 UTC));
        assert_eq!(window.weekend_start, datetime!(2024-10-26 00:00 UTC));
    }

    #[test]
    fn day_boundaries_follow_the_clock_offset() {
        // 01:00 on the 16th in UTC+8 is still the 15th in UTC.
        let now = datetime!(2024-10-16 01:00 +8);
        let activities = vec![
            sample("late-utc-15th", "Noodles", "2024-10-15T17:00:00Z"),
            sample("early-utc-15th", "Dim sum", "2024-10-15T15:00:00Z"),
        ];
        let today = filter_by_date(&activities, Bucket::Today, now);
        assert_eq!(ids(&today), vec!["late-utc-15th"]);
    }

    #[test]
    fn malformed_dates_never_match() {
        let activities = vec![sample("broken", "Nope", "not-a-date")];
        for bucket in Bucket::iter() {
            assert!(filter_by_date(&activities, bucket, NOW).is_empty(), "{bucket}");
        }
    }

    #[test]
    fn bucket_names_parse_leniently() {
        assert_eq!(Bucket::from_name("today"), Bucket::Today);
        assert_eq!(Bucket::from_name(" Weekend "), Bucket::Weekend);
        assert_eq!(Bucket::from_name("PASSED"), Bucket::Passed);
        assert_eq!(Bucket::from_name("next-month"), Bucket::Upcoming);
        assert_eq!(Bucket::Tomorrow.to_string(), "tomorrow");
    }
}
