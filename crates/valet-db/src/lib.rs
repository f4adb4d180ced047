//! SQLite persistence backend.
//!
//! One durable connection behind a mutex; every write hits disk before the
//! call returns. The scheduler consumes this store through the
//! [`DispatchStore`] and [`SettingsProvider`] capability traits, the command
//! router through the inherent per-user methods.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use valet_core::error::{Result, ValetError};
use valet_core::traits::{DispatchStore, SettingsProvider};
use valet_core::types::{FeedSubscription, KeywordKind, Note, Reminder};

/// Timezone assumed for users who never ran /settimezone.
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

const SETTING_FEED_INTERVAL: &str = "rss_interval";
const SETTING_API_BASE: &str = "tg_api_base";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    /// Fallback poll period when the settings table carries no override.
    default_feed_interval: u64,
}

fn store_err<E: std::fmt::Display>(e: E) -> ValetError {
    ValetError::Store(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path, default_feed_interval: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn, default_feed_interval)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(default_feed_interval: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn, default_feed_interval)
    }

    fn with_connection(conn: Connection, default_feed_interval: u64) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                chat_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                remind_at INTEGER NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                sent INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            CREATE TABLE IF NOT EXISTS rss_feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                chat_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                last_item_id TEXT,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            CREATE TABLE IF NOT EXISTS rss_keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'include'
            );
            CREATE TABLE IF NOT EXISTS user_timezone (
                user_id TEXT PRIMARY KEY,
                timezone TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_feed_interval,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| store_err(e.to_string()))
    }

    // ── Reminders ──

    pub fn add_reminder(
        &self,
        user_id: &str,
        chat_id: i64,
        message: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders (user_id, chat_id, message, remind_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, chat_id, message, remind_at.timestamp()],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Pending reminders for one user, soonest first.
    pub fn list_reminders(&self, user_id: &str) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, chat_id, message, remind_at, sent FROM reminders
                 WHERE user_id = ?1 AND sent = 0 ORDER BY remind_at",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], row_to_reminder)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete a reminder owned by `user_id`. Returns whether a row went away.
    pub fn delete_reminder(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM reminders WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    // ── Notes ──

    pub fn add_note(&self, user_id: &str, content: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notes (user_id, content) VALUES (?1, ?2)",
            rusqlite::params![user_id, content],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_notes(&self, user_id: &str, limit: u32) -> Result<Vec<Note>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, content, created_at FROM notes
                 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user_id, limit], |row| {
                Ok(Note {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    content: row.get(2)?,
                    created_at: ts_to_utc(row.get(3)?),
                })
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn delete_note(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    pub fn clear_notes(&self, user_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM notes WHERE user_id = ?1", [user_id])
            .map_err(store_err)
    }

    // ── Feed subscriptions ──

    pub fn add_feed(
        &self,
        user_id: &str,
        chat_id: i64,
        url: &str,
        title: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO rss_feeds (user_id, chat_id, url, title) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, chat_id, url, title],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_feeds_for(&self, user_id: &str) -> Result<Vec<FeedSubscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, chat_id, url, title, last_item_id FROM rss_feeds
                 WHERE user_id = ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], row_to_feed)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn delete_feed(&self, id: i64, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM rss_feeds WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    // ── Keyword rules ──

    /// Insert a keyword rule; duplicate (keyword, kind) pairs are ignored.
    /// Returns whether a new row was inserted.
    pub fn add_keyword(&self, keyword: &str, kind: KeywordKind) -> Result<bool> {
        let conn = self.lock()?;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM rss_keywords WHERE keyword = ?1 AND kind = ?2)",
                rusqlite::params![keyword, kind.as_str()],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        if exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO rss_keywords (keyword, kind) VALUES (?1, ?2)",
            rusqlite::params![keyword, kind.as_str()],
        )
        .map_err(store_err)?;
        Ok(true)
    }

    pub fn delete_keyword(&self, keyword: &str, kind: KeywordKind) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM rss_keywords WHERE keyword = ?1 AND kind = ?2",
                rusqlite::params![keyword, kind.as_str()],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    pub fn list_keywords(&self, kind: KeywordKind) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT keyword FROM rss_keywords WHERE kind = ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([kind.as_str()], |row| row.get(0))
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Timezones ──

    /// User timezone, falling back to [`DEFAULT_TIMEZONE`].
    pub fn timezone(&self, user_id: &str) -> Result<String> {
        let conn = self.lock()?;
        let tz = conn
            .query_row(
                "SELECT timezone FROM user_timezone WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string());
        Ok(tz)
    }

    pub fn set_timezone(&self, user_id: &str, timezone: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_timezone (user_id, timezone) VALUES (?1, ?2)",
            rusqlite::params![user_id, timezone],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ── Settings ──

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        match conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| {
            r.get(0)
        }) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn feed_interval_minutes(&self) -> u64 {
        self.setting(SETTING_FEED_INTERVAL)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.default_feed_interval)
    }

    pub fn set_feed_interval_minutes(&self, minutes: u64) -> Result<()> {
        self.set_setting(SETTING_FEED_INTERVAL, &minutes.to_string())
    }
}

fn ts_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chat_id: row.get(2)?,
        message: row.get(3)?,
        remind_at: ts_to_utc(row.get(4)?),
        sent: row.get::<_, i64>(5)? != 0,
    })
}

fn row_to_feed(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedSubscription> {
    Ok(FeedSubscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chat_id: row.get(2)?,
        url: row.get(3)?,
        title: row.get(4)?,
        last_item_id: row.get(5)?,
    })
}

#[async_trait]
impl DispatchStore for SqliteStore {
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, chat_id, message, remind_at, sent FROM reminders
                 WHERE remind_at <= ?1 AND sent = 0",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([now.timestamp()], row_to_reminder)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE reminders SET sent = 1 WHERE id = ?1", [id])
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_feeds(&self) -> Result<Vec<FeedSubscription>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, user_id, chat_id, url, title, last_item_id FROM rss_feeds")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], row_to_feed)
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn advance_cursor(&self, feed_id: i64, item_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE rss_feeds SET last_item_id = ?1 WHERE id = ?2",
            rusqlite::params![item_id, feed_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn keywords(&self, kind: KeywordKind) -> Result<Vec<String>> {
        self.list_keywords(kind)
    }
}

#[async_trait]
impl SettingsProvider for SqliteStore {
    async fn feed_poll_minutes(&self) -> u64 {
        self.feed_interval_minutes()
    }

    async fn api_base_override(&self) -> Option<String> {
        self.setting(SETTING_API_BASE)
            .ok()
            .flatten()
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(30).unwrap()
    }

    #[tokio::test]
    async fn due_query_skips_sent_and_future() {
        let s = store();
        let now = Utc::now();
        let past = s.add_reminder("u1", 7, "past", now - Duration::seconds(1)).unwrap();
        s.add_reminder("u1", 7, "future", now + Duration::hours(1)).unwrap();

        let due = s.due_reminders(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past);

        s.mark_sent(past).await.unwrap();
        assert!(s.due_reminders(now).await.unwrap().is_empty());
        // terminal: not listed for the user either
        assert!(s.list_reminders("u1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_advance_overwrites() {
        let s = store();
        let id = s.add_feed("u1", 9, "http://example.com/feed", Some("Example")).unwrap();
        s.advance_cursor(id, "item-1").await.unwrap();
        s.advance_cursor(id, "item-2").await.unwrap();
        let feeds = s.list_feeds().await.unwrap();
        assert_eq!(feeds[0].last_item_id.as_deref(), Some("item-2"));
    }

    #[test]
    fn keyword_insert_deduplicates() {
        let s = store();
        assert!(s.add_keyword("rust", KeywordKind::Include).unwrap());
        assert!(!s.add_keyword("rust", KeywordKind::Include).unwrap());
        // same word, other kind is a distinct rule
        assert!(s.add_keyword("rust", KeywordKind::Exclude).unwrap());
        assert_eq!(s.list_keywords(KeywordKind::Include).unwrap(), vec!["rust"]);
    }

    #[test]
    fn timezone_defaults_when_unset() {
        let s = store();
        assert_eq!(s.timezone("nobody").unwrap(), DEFAULT_TIMEZONE);
        s.set_timezone("u1", "Europe/London").unwrap();
        assert_eq!(s.timezone("u1").unwrap(), "Europe/London");
    }

    #[test]
    fn feed_interval_setting_overrides_default() {
        let s = store();
        assert_eq!(s.feed_interval_minutes(), 30);
        s.set_feed_interval_minutes(5).unwrap();
        assert_eq!(s.feed_interval_minutes(), 5);
    }

    #[tokio::test]
    async fn api_base_override_comes_from_settings() {
        let s = store();
        assert_eq!(s.api_base_override().await, None);
        s.set_setting("tg_api_base", "https://tg.example.com").unwrap();
        assert_eq!(
            s.api_base_override().await.as_deref(),
            Some("https://tg.example.com")
        );
    }
}
