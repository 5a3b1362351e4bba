use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            full_name TEXT,
            website TEXT,
            avatar_url TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS activity_types (
            name TEXT PRIMARY KEY COLLATE NOCASE
        );

        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            date TEXT NOT NULL,
            starts_at INTEGER NOT NULL,
            end_date TEXT,
            location TEXT NOT NULL DEFAULT '',
            image_uri TEXT,
            host_id TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            kind TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS activities_position
            ON activities(latitude, longitude);
        CREATE INDEX IF NOT EXISTS activities_starts_at
            ON activities(starts_at);

        CREATE TABLE IF NOT EXISTS attendance (
            user_id TEXT NOT NULL,
            activity_id TEXT NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, activity_id),
            FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS messages_conversation
            ON messages(conversation_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS messages_sender ON messages(sender_id);
        CREATE INDEX IF NOT EXISTS messages_receiver ON messages(receiver_id);
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
