use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use regex::RegexBuilder;
use rusqlite::config::DbConfig;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::activity::geo::haversine_meters;
use crate::activity::{
    Activity, ActivitySummary, BoundingBox, BucketWindow, GeoPoint, NewActivity,
};
use crate::chat::identity::CONVERSATION_DELIMITER;
use crate::chat::{ConversationId, Message};
use crate::clock::{format_instant, parse_instant};
use crate::config::StorageOptions;
use crate::feed::{FeedEvent, FeedHub};
use crate::profile::Profile;
use crate::search::{searchable_text, ActivityQuery};

mod schema;

const ACTIVITY_COLUMNS: &str = "a.id,
        a.title,
        a.description,
        a.date,
        a.end_date,
        a.location,
        a.image_uri,
        a.host_id,
        a.latitude,
        a.longitude,
        a.kind,
        (SELECT COUNT(*) FROM attendance att WHERE att.activity_id = a.id)";
const MAX_TITLE_CHARS: usize = 120;
const MAX_MESSAGE_CHARS: usize = 4000;
const DEFAULT_ACTIVITY_TYPES: [&str; 8] = [
    "outdoors", "sports", "music", "food", "games", "learning", "arts", "social",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendee {
    pub user_id: String,
    pub username: Option<String>,
    pub joined_at: i64,
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
    feed: Option<FeedHub>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// Stored messages are announced on `hub` from now on.
    pub fn with_feed(mut self, hub: FeedHub) -> Self {
        self.feed = Some(hub);
        self
    }

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let id = profile.id.trim();
        if id.is_empty() {
            bail!("profile id cannot be empty");
        }
        let username = profile.username.trim();
        if username.is_empty() {
            bail!("username cannot be empty");
        }
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO profiles (id, username, full_name, website, avatar_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     username = excluded.username,
                     full_name = excluded.full_name,
                     website = excluded.website,
                     avatar_url = excluded.avatar_url,
                     updated_at = excluded.updated_at",
                params![
                    id,
                    username,
                    profile.full_name,
                    profile.website,
                    profile.avatar_url,
                    now
                ],
            )
            .context("upserting profile")?;
            Ok(())
        })
    }

    pub fn fetch_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, username, full_name, website, avatar_url FROM profiles WHERE id = ?1",
                params![id],
                profile_from_row,
            )
            .optional()
            .context("fetching profile")
        })
    }

    pub fn fetch_profiles(&self, ids: &[String]) -> Result<HashMap<String, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.with_connection(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT id, username, full_name, website, avatar_url
                 FROM profiles
                 WHERE id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), profile_from_row)?;
            let mut profiles = HashMap::with_capacity(ids.len());
            for row in rows {
                let profile = row.context("fetching profiles")?;
                profiles.insert(profile.id.clone(), profile);
            }
            Ok(profiles)
        })
    }

    pub fn list_activity_types(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM activity_types ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching activity types")
        })
    }

    /// Validates `new` and stores it, returning the generated id. The start
    /// date is normalised to RFC 3339 UTC.
    pub fn create_activity(&self, new: &NewActivity) -> Result<String> {
        let title = new.title.trim();
        if title.is_empty() {
            bail!("activity title cannot be empty");
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            bail!("activity title is longer than {MAX_TITLE_CHARS} characters");
        }
        let host_id = new.host_id.trim();
        if host_id.is_empty() {
            bail!("activity host cannot be empty");
        }
        let starts_at = parse_instant(&new.date)
            .ok_or_else(|| anyhow!("invalid start date '{}'", new.date))?;
        let end_date = match new.end_date.as_deref() {
            Some(raw) => {
                let ends_at =
                    parse_instant(raw).ok_or_else(|| anyhow!("invalid end date '{raw}'"))?;
                if ends_at < starts_at {
                    bail!("activity cannot end before it starts");
                }
                Some(format_instant(ends_at))
            }
            None => None,
        };
        if let Some(point) = new.coordinates {
            if !point.is_valid() {
                bail!(
                    "coordinates out of range: {}, {}",
                    point.latitude,
                    point.longitude
                );
            }
        }
        let kind = new
            .kind
            .as_deref()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty());

        self.with_connection(|conn| {
            if let Some(kind) = kind.as_deref() {
                let known = conn
                    .query_row(
                        "SELECT 1 FROM activity_types WHERE name = ?1",
                        params![kind],
                        |_row| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !known {
                    bail!("unknown activity type '{kind}'");
                }
            }
            let id = Uuid::new_v4().to_string();
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO activities (
                     id, title, description, date, starts_at, end_date, location,
                     image_uri, host_id, latitude, longitude, kind, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id,
                    title,
                    new.description.as_deref().map(str::trim),
                    format_instant(starts_at),
                    starts_at.unix_timestamp(),
                    end_date,
                    new.location.trim(),
                    new.image_uri,
                    host_id,
                    new.coordinates.map(|p| p.latitude),
                    new.coordinates.map(|p| p.longitude),
                    kind,
                    now
                ],
            )
            .context("inserting activity")?;
            tracing::info!(%id, title, "created activity");
            Ok(id)
        })
    }

    pub fn fetch_activity(&self, id: &str) -> Result<Option<ActivitySummary>> {
        self.with_connection(|conn| {
            let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities a WHERE a.id = ?1");
            conn.query_row(&sql, params![id], activity_summary_from_row)
                .optional()
                .context("fetching activity")
        })
    }

    pub fn list_activities(&self, limit: usize) -> Result<Vec<ActivitySummary>> {
        let mut found = self.query_activities("", [])?;
        found.truncate(limit);
        Ok(found)
    }

    /// Activities within `radius_m` of `center`, nearest first.
    pub fn nearby_activities(
        &self,
        center: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<ActivitySummary>> {
        if !center.is_valid() {
            bail!(
                "coordinates out of range: {}, {}",
                center.latitude,
                center.longitude
            );
        }
        if !(radius_m.is_finite() && radius_m > 0.0) {
            bail!("search radius must be positive");
        }
        let bbox = BoundingBox::enclosing_radius(center, radius_m);
        let candidates = self.query_activities(
            "WHERE a.latitude BETWEEN ?1 AND ?2 AND a.longitude BETWEEN ?3 AND ?4",
            params![bbox.min_lat, bbox.max_lat, bbox.min_lng, bbox.max_lng],
        )?;
        let mut found: Vec<ActivitySummary> = candidates
            .into_iter()
            .filter_map(|mut summary| {
                let distance = haversine_meters(center, summary.activity.coordinates()?);
                if distance > radius_m {
                    return None;
                }
                summary.dist_meters = Some(distance);
                Some(summary)
            })
            .collect();
        found.sort_by(|a, b| {
            let a = a.dist_meters.unwrap_or(f64::MAX);
            let b = b.dist_meters.unwrap_or(f64::MAX);
            a.total_cmp(&b)
        });
        found.truncate(limit);
        tracing::debug!(count = found.len(), radius_m, "nearby activities");
        Ok(found)
    }

    /// Activities whose position falls inside a map viewport.
    pub fn activities_in_view(&self, bbox: &BoundingBox) -> Result<Vec<ActivitySummary>> {
        // The latitude band rides the position index; the box itself is checked here.
        let mut found = self.query_activities(
            "WHERE a.latitude BETWEEN ?1 AND ?2 AND a.longitude IS NOT NULL",
            params![bbox.min_lat, bbox.max_lat],
        )?;
        found.retain(|summary| {
            summary
                .activity
                .coordinates()
                .is_some_and(|point| bbox.contains(point))
        });
        Ok(found)
    }

    pub fn search_activities(
        &self,
        query: &ActivityQuery,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<ActivitySummary>> {
        let regex = query
            .regex_pattern
            .as_deref()
            .map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
            .transpose()
            .context("compiling regex search pattern")?;

        let mut found = self.query_activities("", [])?;
        found.retain(|summary| query.matches(&summary.activity));
        if let Some(regex) = &regex {
            found.retain(|summary| regex.is_match(&searchable_text(&summary.activity)));
        }
        if let Some(bucket) = query.bucket {
            let window = BucketWindow::at(now);
            found.retain(|summary| {
                summary
                    .activity
                    .starts_at()
                    .is_some_and(|start| window.contains(bucket, start))
            });
        }
        found.truncate(limit);
        Ok(found)
    }

    /// Registers `user_id` for an activity. Returns `false` if already registered.
    pub fn join_activity(&self, user_id: &str, activity_id: &str) -> Result<bool> {
        let user = user_id.trim();
        if user.is_empty() {
            bail!("user id cannot be empty");
        }
        self.with_connection(|conn| {
            ensure_activity_exists(conn, activity_id)?;
            let now = OffsetDateTime::now_utc().unix_timestamp();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO attendance (user_id, activity_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![user, activity_id, now],
                )
                .context("registering attendance")?;
            Ok(inserted > 0)
        })
    }

    /// Returns `false` if the user was not registered.
    pub fn leave_activity(&self, user_id: &str, activity_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            ensure_activity_exists(conn, activity_id)?;
            let removed = conn
                .execute(
                    "DELETE FROM attendance WHERE user_id = ?1 AND activity_id = ?2",
                    params![user_id, activity_id],
                )
                .context("cancelling attendance")?;
            Ok(removed > 0)
        })
    }

    pub fn is_attending(&self, user_id: &str, activity_id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM attendance WHERE user_id = ?1 AND activity_id = ?2",
                    params![user_id, activity_id],
                    |_row| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(found)
        })
    }

    pub fn attendees(&self, activity_id: &str) -> Result<Vec<Attendee>> {
        self.with_connection(|conn| {
            ensure_activity_exists(conn, activity_id)?;
            let mut stmt = conn.prepare(
                "SELECT att.user_id, p.username, att.joined_at
                 FROM attendance att
                 LEFT JOIN profiles p ON p.id = att.user_id
                 WHERE att.activity_id = ?1
                 ORDER BY att.joined_at, att.user_id",
            )?;
            let rows = stmt.query_map(params![activity_id], |row| {
                Ok(Attendee {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    joined_at: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching attendees")
        })
    }

    /// Stores a direct message and announces it on the attached feed.
    pub fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        sent_at: OffsetDateTime,
    ) -> Result<Message> {
        let sender = sender_id.trim();
        let receiver = receiver_id.trim();
        for user in [sender, receiver] {
            if user.is_empty() {
                bail!("message participants cannot be empty");
            }
            if user.contains(CONVERSATION_DELIMITER) {
                bail!("user id '{user}' contains '{CONVERSATION_DELIMITER}'");
            }
        }
        if content.trim().is_empty() {
            bail!("message cannot be empty");
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            bail!("message is longer than {MAX_MESSAGE_CHARS} characters");
        }

        let conversation = ConversationId::between(sender, receiver);
        let created_at = format_instant(sent_at);
        let created_at_ms = i64::try_from(sent_at.unix_timestamp_nanos() / 1_000_000)
            .context("message timestamp out of range")?;
        let id = self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO messages (
                     conversation_id, sender_id, receiver_id, content, created_at, created_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conversation.as_str(),
                    sender,
                    receiver,
                    content,
                    created_at,
                    created_at_ms
                ],
            )
            .context("inserting message")?;
            Ok(conn.last_insert_rowid())
        })?;

        let message = Message {
            id,
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            created_at,
        };
        tracing::debug!(id, conversation = %conversation, "stored message");
        if let Some(feed) = &self.feed {
            feed.publish(FeedEvent::MessageInserted(message.clone()));
        }
        Ok(message)
    }

    /// Every message of one conversation, oldest first.
    pub fn fetch_conversation(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at_ms ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![conversation.as_str()], message_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching conversation")
        })
    }

    /// Messages of one conversation stored after `after_id`, oldest first.
    pub fn fetch_conversation_since(
        &self,
        conversation: &ConversationId,
        after_id: i64,
    ) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND id > ?2
                 ORDER BY created_at_ms ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![conversation.as_str(), after_id], message_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching new conversation messages")
        })
    }

    /// Messages sent or received by `user_id`, newest first.
    pub fn fetch_user_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY created_at_ms DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], message_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("fetching user messages")
        })
    }

    fn query_activities<P>(&self, clause: &str, params: P) -> Result<Vec<ActivitySummary>>
    where
        P: rusqlite::Params,
    {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {ACTIVITY_COLUMNS}
                 FROM activities a
                 {clause}
                 ORDER BY a.starts_at ASC, a.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params, activity_summary_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("querying activities")
        })
    }
}

fn ensure_activity_exists(conn: &Connection, activity_id: &str) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM activities WHERE id = ?1",
            params![activity_id],
            |_row| Ok(()),
        )
        .optional()
        .context("checking activity existence")?
        .is_some();
    if !found {
        bail!("activity {activity_id} not found");
    }
    Ok(())
}

fn activity_summary_from_row(row: &Row<'_>) -> rusqlite::Result<ActivitySummary> {
    Ok(ActivitySummary {
        activity: Activity {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            date: row.get(3)?,
            end_date: row.get(4)?,
            location: row.get(5)?,
            image_uri: row.get(6)?,
            host_id: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
            kind: row.get(10)?,
        },
        attendee_count: row.get(11)?,
        dist_meters: None,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        website: row.get(3)?,
        avatar_url: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn init(storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &storage.database_path;
    if db_path.as_os_str().is_empty() {
        bail!("database path is not configured");
    }
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    if !existed {
        seed_activity_types(&conn)?;
    }
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
        feed: None,
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn seed_activity_types(conn: &Connection) -> Result<()> {
    tracing::info!("seeding activity types");
    for name in DEFAULT_ACTIVITY_TYPES {
        conn.execute(
            "INSERT OR IGNORE INTO activity_types (name) VALUES (?1)",
            params![name],
        )
        .context("inserting activity type")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Bucket;
    use crate::chat::build_inbox;
    use crate::search::parse_query;
    use tempfile::TempDir;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-10-16 15:00 UTC);
    const SF: GeoPoint = GeoPoint::new(37.7749, -122.4194);
    const OAKLAND: GeoPoint = GeoPoint::new(37.8044, -122.2712);
    const BERKELEY: GeoPoint = GeoPoint::new(37.8715, -122.2730);

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let options = StorageOptions {
            database_path: temp.path().join("data/meetup.db"),
            ..StorageOptions::default()
        };
        let storage = init(&options)?;
        Ok((temp, storage))
    }

    fn new_activity(title: &str, date: &str, at: Option<GeoPoint>) -> NewActivity {
        NewActivity {
            title: title.to_string(),
            date: date.to_string(),
            location: format!("{title} venue"),
            host_id: "host".to_string(),
            coordinates: at,
            ..NewActivity::default()
        }
    }

    #[test]
    fn create_activity_normalises_start_date() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let mut new = new_activity("Night market", "2024-10-19 18:00:00+08", Some(SF));
        new.kind = Some(" Food ".into());
        new.end_date = Some("2024-10-19T14:00:00Z".into());
        let id = storage.create_activity(&new)?;

        let summary = storage.fetch_activity(&id)?.expect("activity stored");
        assert_eq!(summary.activity.date, "2024-10-19T10:00:00Z");
        assert_eq!(summary.activity.end_date.as_deref(), Some("2024-10-19T14:00:00Z"));
        assert_eq!(summary.activity.kind.as_deref(), Some("food"));
        assert_eq!(summary.activity.coordinates(), Some(SF));
        assert_eq!(summary.attendee_count, 0);
        Ok(())
    }

    #[test]
    fn create_activity_rejects_invalid_input() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert!(storage
            .create_activity(&new_activity("  ", "2024-10-19T10:00:00Z", None))
            .is_err());
        assert!(storage
            .create_activity(&new_activity("Picnic", "tomorrow", None))
            .is_err());

        let mut backwards = new_activity("Picnic", "2024-10-19T10:00:00Z", None);
        backwards.end_date = Some("2024-10-19T09:00:00Z".into());
        assert!(storage.create_activity(&backwards).is_err());

        let mut unknown = new_activity("Picnic", "2024-10-19T10:00:00Z", None);
        unknown.kind = Some("skydiving".into());
        let err = storage.create_activity(&unknown).unwrap_err();
        assert!(err.to_string().contains("unknown activity type"));

        let off_map = new_activity("Picnic", "2024-10-19T10:00:00Z", Some(GeoPoint::new(120.0, 0.0)));
        assert!(storage.create_activity(&off_map).is_err());
        Ok(())
    }

    #[test]
    fn seeded_types_are_listed() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let types = storage.list_activity_types()?;
        assert!(types.contains(&"outdoors".to_string()));
        assert_eq!(types.len(), DEFAULT_ACTIVITY_TYPES.len());
        Ok(())
    }

    #[test]
    fn nearby_orders_by_distance_within_radius() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let berkeley = storage.create_activity(&new_activity(
            "Campus tour",
            "2024-10-18T10:00:00Z",
            Some(BERKELEY),
        ))?;
        let oakland = storage.create_activity(&new_activity(
            "Lake walk",
            "2024-10-19T10:00:00Z",
            Some(OAKLAND),
        ))?;
        let sf = storage.create_activity(&new_activity(
            "Ferry building lunch",
            "2024-10-20T10:00:00Z",
            Some(SF),
        ))?;
        storage.create_activity(&new_activity("Online meetup", "2024-10-20T10:00:00Z", None))?;

        let within_20km = storage.nearby_activities(SF, 20_000.0, 10)?;
        let ids: Vec<&str> = within_20km.iter().map(|s| s.activity.id.as_str()).collect();
        assert_eq!(ids, vec![sf.as_str(), oakland.as_str(), berkeley.as_str()]);
        assert_eq!(within_20km[0].dist_meters, Some(0.0));

        let within_14km = storage.nearby_activities(SF, 14_000.0, 10)?;
        assert_eq!(within_14km.len(), 2);

        let capped = storage.nearby_activities(SF, 20_000.0, 1)?;
        assert_eq!(capped.len(), 1);

        assert!(storage.nearby_activities(SF, 0.0, 10).is_err());
        Ok(())
    }

    #[test]
    fn view_query_uses_the_viewport() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.create_activity(&new_activity("Lake walk", "2024-10-19T10:00:00Z", Some(OAKLAND)))?;
        storage.create_activity(&new_activity("Pier 39", "2024-10-19T11:00:00Z", Some(SF)))?;

        let view = BoundingBox::around(SF, 0.05, 0.05);
        let found = storage.activities_in_view(&view)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].activity.title, "Pier 39");
        Ok(())
    }

    #[test]
    fn view_query_excludes_rows_inside_the_band_but_outside_the_box() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        // Same latitude as the pier, far east of the viewport.
        let east = GeoPoint::new(SF.latitude, -121.9);
        storage.create_activity(&new_activity("Hill walk", "2024-10-19T10:00:00Z", Some(east)))?;
        storage.create_activity(&new_activity("Pier 39", "2024-10-19T11:00:00Z", Some(SF)))?;
        storage.create_activity(&new_activity("Online meetup", "2024-10-19T12:00:00Z", None))?;

        let found = storage.activities_in_view(&BoundingBox::around(SF, 0.05, 0.05))?;
        let titles: Vec<&str> = found.iter().map(|s| s.activity.title.as_str()).collect();
        assert_eq!(titles, vec!["Pier 39"]);
        Ok(())
    }

    #[test]
    fn search_combines_terms_types_and_buckets() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let mut hike = new_activity("Saturday hike", "2024-10-19T09:00:00Z", None);
        hike.kind = Some("outdoors".into());
        hike.description = Some("Meet at the trailhead".into());
        storage.create_activity(&hike)?;
        let mut jazz = new_activity("Jazz night", "2024-10-16T20:00:00Z", None);
        jazz.kind = Some("music".into());
        storage.create_activity(&jazz)?;
        storage.create_activity(&new_activity("Old hike", "2024-10-01T09:00:00Z", None))?;

        let hits = storage.search_activities(&parse_query("trailhead"), NOW, 10)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].activity.title, "Saturday hike");

        let hits = storage.search_activities(&parse_query("hike when:passed"), NOW, 10)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].activity.title, "Old hike");

        let hits = storage.search_activities(&parse_query("type:music when:today"), NOW, 10)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].activity.title, "Jazz night");

        let mut query = parse_query("when:weekend");
        assert_eq!(query.bucket, Some(Bucket::Weekend));
        query.regex_pattern = Some("sat.*hike".into());
        let hits = storage.search_activities(&query, NOW, 10)?;
        assert_eq!(hits.len(), 1);
        Ok(())
    }

    #[test]
    fn attendance_is_idempotent_and_counted() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let id = storage.create_activity(&new_activity("Board games", "2024-10-19T18:00:00Z", None))?;
        storage.upsert_profile(&Profile {
            id: "alice".into(),
            username: "alice_w".into(),
            ..Profile::default()
        })?;

        assert!(storage.join_activity("alice", &id)?);
        assert!(!storage.join_activity("alice", &id)?);
        assert!(storage.join_activity("bob", &id)?);
        assert!(storage.is_attending("alice", &id)?);

        let summary = storage.fetch_activity(&id)?.expect("activity stored");
        assert_eq!(summary.attendee_count, 2);

        let attendees = storage.attendees(&id)?;
        let alice = attendees
            .iter()
            .find(|a| a.user_id == "alice")
            .expect("alice attends");
        assert_eq!(alice.username.as_deref(), Some("alice_w"));
        assert!(attendees.iter().any(|a| a.user_id == "bob" && a.username.is_none()));

        assert!(storage.leave_activity("alice", &id)?);
        assert!(!storage.leave_activity("alice", &id)?);
        assert!(!storage.is_attending("alice", &id)?);
        Ok(())
    }

    #[test]
    fn joining_a_missing_activity_fails() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let err = storage.join_activity("alice", "no-such-id").unwrap_err();
        assert!(err.to_string().contains("not found"));
        Ok(())
    }

    #[test]
    fn conversation_is_returned_oldest_first() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.send_message("bob", "alice", "second", datetime!(2024-10-19 10:05 UTC))?;
        storage.send_message("alice", "bob", "first", datetime!(2024-10-19 10:00 UTC))?;
        storage.send_message("alice", "carol", "elsewhere", datetime!(2024-10-19 10:01 UTC))?;

        let conversation = ConversationId::between("alice", "bob");
        let messages = storage.fetch_conversation(&conversation)?;
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(messages[0].created_at, "2024-10-19T10:00:00Z");
        Ok(())
    }

    #[test]
    fn conversation_since_returns_only_newer_rows() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let first = storage.send_message("alice", "bob", "first", datetime!(2024-10-19 10:00 UTC))?;
        storage.send_message("alice", "carol", "elsewhere", datetime!(2024-10-19 10:01 UTC))?;
        storage.send_message("bob", "alice", "late", datetime!(2024-10-19 09:59 UTC))?;

        let conversation = ConversationId::between("alice", "bob");
        let newer = storage.fetch_conversation_since(&conversation, first.id)?;
        let contents: Vec<&str> = newer.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["late"]);
        assert!(storage
            .fetch_conversation_since(&conversation, newer[0].id)?
            .is_empty());
        Ok(())
    }

    #[test]
    fn blank_or_malformed_messages_are_rejected() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert!(storage.send_message("alice", "bob", "   ", NOW).is_err());
        assert!(storage.send_message("alice", "", "hi", NOW).is_err());
        assert!(storage.send_message("al+ice", "bob", "hi", NOW).is_err());
        Ok(())
    }

    #[test]
    fn stored_messages_are_published_to_the_feed() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let hub = FeedHub::new();
        let subscription = hub.subscribe();
        let storage = storage.with_feed(hub);

        let sent = storage.send_message("alice", "bob", "hello", NOW)?;
        assert_eq!(
            subscription.try_recv(),
            Some(FeedEvent::MessageInserted(sent))
        );
        Ok(())
    }

    #[test]
    fn user_messages_feed_the_inbox() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.upsert_profile(&Profile {
            id: "bob".into(),
            username: "bobby".into(),
            ..Profile::default()
        })?;
        storage.send_message("alice", "bob", "hi bob", datetime!(2024-10-19 09:00 UTC))?;
        storage.send_message("bob", "alice", "hey!", datetime!(2024-10-19 09:02 UTC))?;
        storage.send_message("carol", "alice", "lunch?", datetime!(2024-10-19 08:00 UTC))?;
        storage.send_message("bob", "carol", "not alice", datetime!(2024-10-19 11:00 UTC))?;

        let messages = storage.fetch_user_messages("alice", 100)?;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "hey!");

        let peers: Vec<String> = messages
            .iter()
            .map(|m| if m.sender_id == "alice" { m.receiver_id.clone() } else { m.sender_id.clone() })
            .collect();
        let profiles = storage.fetch_profiles(&peers)?;
        let inbox = build_inbox("alice", &messages, &profiles);
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].name, "bobby");
        assert_eq!(inbox[0].last_message, "hey!");
        assert_eq!(inbox[1].name, "User carol");
        Ok(())
    }

    #[test]
    fn profile_upsert_overwrites() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let mut profile = Profile {
            id: "alice".into(),
            username: "alice".into(),
            ..Profile::default()
        };
        storage.upsert_profile(&profile)?;
        profile.username = "alice_w".into();
        profile.website = Some("https://alice.example".into());
        storage.upsert_profile(&profile)?;

        let stored = storage.fetch_profile("alice")?.expect("profile stored");
        assert_eq!(stored, profile);
        assert!(storage.fetch_profile("nobody")?.is_none());
        Ok(())
    }
}
