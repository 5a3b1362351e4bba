use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::parse_instant;

pub mod filter;
pub mod geo;

pub use filter::{filter_by_date, Bucket, BucketWindow};
pub use geo::{BoundingBox, GeoPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Event start as stored; parsed lazily so one bad row cannot poison a list.
    pub date: String,
    pub end_date: Option<String>,
    pub location: String,
    pub image_uri: Option<String>,
    pub host_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub kind: Option<String>,
}

impl Activity {
    pub fn starts_at(&self) -> Option<OffsetDateTime> {
        parse_instant(&self.date)
    }

    pub fn ends_at(&self) -> Option<OffsetDateTime> {
        self.end_date.as_deref().and_then(parse_instant)
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
            _ => None,
        }
    }
}

/// An activity as returned by list queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    #[serde(flatten)]
    pub activity: Activity,
    pub attendee_count: i64,
    pub dist_meters: Option<f64>,
}

/// Fields a host supplies when creating an activity.
#[derive(Debug, Clone, Default)]
pub struct NewActivity {
    pub title: String,
    pub description: Option<String>,
    pub date: String,
    pub end_date: Option<String>,
    pub location: String,
    pub image_uri: Option<String>,
    pub host_id: String,
    pub coordinates: Option<GeoPoint>,
    pub kind: Option<String>,
}

/// Case-insensitive substring match on the title; an empty needle matches everything.
pub fn matches_title(activity: &Activity, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return true;
    }
    activity
        .title
        .to_lowercase()
        .contains(&needle.to_lowercase())
}

#[cfg(test)]
pub(crate) fn sample(id: &str, title: &str, date: &str) -> Activity {
    Activity {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        date: date.to_string(),
        end_date: None,
        location: String::new(),
        image_uri: None,
        host_id: "host".to_string(),
        latitude: None,
        longitude: None,
        kind: None,
    }
}
