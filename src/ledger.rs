use crate::error::LedgerError;
use crate::model::{History, HistoryStatus, NotificationKind, UserDetails};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// Bounded retry after every multi-row write, to tolerate transient lock
/// contention from out-of-band access to the ledger file.
pub const WRITE_RETRY_ATTEMPTS: u32 = 10;
const WRITE_RETRY_BACKOFF: StdDuration = StdDuration::from_secs(1);

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS ledger_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const SCHEMA_VERSION_KEY: &str = "ledger_schema_version";
const SCHEMA_VERSION: u32 = 2;

/// Everything persisted for one decision to notify a user: the notification
/// itself, the delivery receipt when the mail API accepted it, and one link
/// row per covered history version.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub user_id: String,
    pub kind: NotificationKind,
    pub sent: DateTime<Utc>,
    pub status: String,
    pub message_id: Option<String>,
    /// `(history id, update_time)` version pairs covered by this message
    pub histories: Vec<(String, DateTime<Utc>)>,
}

/// A history version linked to a Deletion notification, as consumed by the
/// purge sweeper.
#[derive(Debug, Clone)]
pub struct DeletionLink {
    pub history_id: String,
    pub notification_sent: DateTime<Utc>,
}

/// A history row as stored locally, including the lifecycle annotation.
#[derive(Debug, Clone)]
pub struct StoredHistory {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub update_time: DateTime<Utc>,
    pub size: i64,
    pub status: Option<HistoryStatus>,
}

/// Durable record of every notification sent per history version, keyed by
/// `(history id, update_time)`. Single-writer SQLite store behind a pool of
/// one connection.
pub struct Ledger {
    pool: SqlitePool,
}

/// Canonical timestamp encoding for ledger columns. Fixed microsecond
/// precision so the `(history id, update_time)` version key compares as an
/// exact string across runs.
pub fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| LedgerError::CorruptRow(format!("bad timestamp: {raw}")))
}

fn sqlx_err(err: sqlx::Error) -> LedgerError {
    LedgerError::Sqlx(err.to_string())
}

fn is_lock_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}

impl Ledger {
    /// Open (creating if missing) and migrate the ledger database.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(sqlx_err)?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        sqlx::query(SCHEMA_META_TABLE)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;

        let stored: Option<(String,)> =
            sqlx::query_as("SELECT value FROM ledger_schema_meta WHERE key = ?1")
                .bind(SCHEMA_VERSION_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(sqlx_err)?;
        if let Some((value,)) = &stored {
            let parsed: u32 = value
                .parse()
                .map_err(|_| LedgerError::Migration(format!("bad stored version: {value}")))?;
            if parsed > SCHEMA_VERSION {
                return Err(LedgerError::Migration(format!(
                    "ledger schema version {parsed} is newer than supported {SCHEMA_VERSION}"
                )));
            }
        }

        self.create_tables().await?;

        // Additive migration: the status column postdates the first schema.
        let columns = self.table_columns("histories").await?;
        if !columns.iter().any(|c| c == "status") {
            sqlx::query("ALTER TABLE histories ADD COLUMN status TEXT")
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Migration(e.to_string()))?;
        }

        sqlx::query(
            "INSERT INTO ledger_schema_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SCHEMA_VERSION_KEY)
        .bind(SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn create_tables(&self) -> Result<(), LedgerError> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS users (
                 id TEXT PRIMARY KEY,
                 username TEXT,
                 email TEXT,
                 quota TEXT,
                 quota_percent REAL,
                 total_disk_usage REAL,
                 nice_total_disk_usage TEXT,
                 is_admin INTEGER NOT NULL DEFAULT 0,
                 deleted INTEGER NOT NULL DEFAULT 0,
                 purged INTEGER NOT NULL DEFAULT 0
             )",
            "CREATE TABLE IF NOT EXISTS histories (
                 id TEXT PRIMARY KEY,
                 user_id TEXT,
                 name TEXT NOT NULL,
                 update_time TEXT NOT NULL,
                 size INTEGER NOT NULL,
                 status TEXT
             )",
            "CREATE TABLE IF NOT EXISTS notifications (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 sent TEXT NOT NULL,
                 status TEXT NOT NULL,
                 message_id TEXT
             )",
            "CREATE INDEX IF NOT EXISTS idx_notifications_kind ON notifications(kind)",
            "CREATE TABLE IF NOT EXISTS history_notifications (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 history_id TEXT NOT NULL,
                 history_update_time TEXT NOT NULL,
                 notification_id INTEGER NOT NULL REFERENCES notifications(id)
             )",
            "CREATE INDEX IF NOT EXISTS idx_history_notifications_version
                 ON history_notifications(history_id, history_update_time)",
            "CREATE TABLE IF NOT EXISTS messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 message_id TEXT NOT NULL,
                 status TEXT NOT NULL
             )",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;
        }
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, LedgerError> {
        let rows = sqlx::query(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(rows.iter().map(|row| row.get::<String, _>(0)).collect())
    }

    /// Drop every ledger table and rebuild the schema from scratch.
    pub async fn drop_and_recreate(&self) -> Result<(), LedgerError> {
        for table in [
            "history_notifications",
            "messages",
            "notifications",
            "histories",
            "users",
            "ledger_schema_meta",
        ] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;
        }
        self.migrate().await
    }

    // ── Snapshot upserts ─────────────────────────────────────────

    pub async fn upsert_user(&self, user: &UserDetails) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO users (id, username, email, quota, quota_percent, total_disk_usage,
                                nice_total_disk_usage, is_admin, deleted, purged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 email = excluded.email,
                 quota = excluded.quota,
                 quota_percent = excluded.quota_percent,
                 total_disk_usage = excluded.total_disk_usage,
                 nice_total_disk_usage = excluded.nice_total_disk_usage,
                 is_admin = excluded.is_admin,
                 deleted = excluded.deleted,
                 purged = excluded.purged",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.quota)
        .bind(user.quota_percent)
        .bind(user.total_disk_usage)
        .bind(&user.nice_total_disk_usage)
        .bind(user.is_admin)
        .bind(user.deleted)
        .bind(user.purged)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    /// Upsert a fetched history snapshot. The local `status` annotation is
    /// left untouched on update; the remote stays authoritative for the rest.
    /// `user_id` is deliberately not a foreign key: histories whose owner
    /// lookup failed are still snapshotted without a `users` row.
    pub async fn upsert_history(&self, history: &History) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO histories (id, user_id, name, update_time, size)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 user_id = excluded.user_id,
                 name = excluded.name,
                 update_time = excluded.update_time,
                 size = excluded.size",
        )
        .bind(&history.id)
        .bind(&history.user_id)
        .bind(&history.name)
        .bind(ts(history.update_time))
        .bind(history.size)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    // ── Eligibility ──────────────────────────────────────────────

    /// Whether this exact history version may be notified again.
    ///
    /// No prior notification for the version → `default_if_unseen` (true on
    /// the warning path; false on the deletion path, which requires an
    /// explicit prior warning). A prior Deletion notification permanently
    /// blocks the version; any notification inside the re-notify window
    /// blocks it temporarily.
    pub async fn eligibility(
        &self,
        history_id: &str,
        update_time: DateTime<Utc>,
        default_if_unseen: bool,
        renotify_days: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT n.kind, n.sent
             FROM history_notifications hn
             JOIN notifications n ON n.id = hn.notification_id
             WHERE hn.history_id = ?1 AND hn.history_update_time = ?2",
        )
        .bind(history_id)
        .bind(ts(update_time))
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if rows.is_empty() {
            return Ok(default_if_unseen);
        }

        let cooldown_cutoff = now - Duration::days(renotify_days);
        let mut eligible = true;
        for (kind, sent) in rows {
            if kind == NotificationKind::Deletion.as_str() {
                tracing::error!(
                    history_id,
                    "history already notified regarding deletion but presented again; \
                     manual deletion required, skipping"
                );
                return Ok(false);
            }
            if parse_ts(&sent)? > cooldown_cutoff {
                eligible = false;
            }
        }
        Ok(eligible)
    }

    /// Earliest notification sent for this exact version, used to project
    /// the deletion date shown in warning emails.
    pub async fn first_notified_at(
        &self,
        history_id: &str,
        update_time: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT n.sent
             FROM history_notifications hn
             JOIN notifications n ON n.id = hn.notification_id
             WHERE hn.history_id = ?1 AND hn.history_update_time = ?2
             ORDER BY n.sent ASC
             LIMIT 1",
        )
        .bind(history_id)
        .bind(ts(update_time))
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.map(|(sent,)| parse_ts(&sent)).transpose()
    }

    // ── Notification recording ───────────────────────────────────

    /// Persist a notification, its delivery receipt and its history links in
    /// one transaction, returning the generated notification id. Retried on
    /// lock contention per the module constants; exhaustion is reported as
    /// [`LedgerError::ContentionExhausted`] so the caller can skip this
    /// user's linkage and continue the run.
    pub async fn record_notification(
        &self,
        record: &NotificationRecord,
    ) -> Result<i64, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_record(record).await {
                Ok(id) => return Ok(id),
                Err(err) if is_lock_contention(&err) => {
                    if attempt >= WRITE_RETRY_ATTEMPTS {
                        return Err(LedgerError::ContentionExhausted { attempts: attempt });
                    }
                    tracing::warn!(attempt, "ledger write contention; waiting and retrying");
                    tokio::time::sleep(WRITE_RETRY_BACKOFF).await;
                }
                Err(err) => return Err(sqlx_err(err)),
            }
        }
    }

    async fn try_record(&self, record: &NotificationRecord) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let notification_id: i64 = sqlx::query_scalar(
            "INSERT INTO notifications (user_id, kind, sent, status, message_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
        )
        .bind(&record.user_id)
        .bind(record.kind.as_str())
        .bind(ts(record.sent))
        .bind(&record.status)
        .bind(&record.message_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(message_id) = &record.message_id {
            sqlx::query("INSERT INTO messages (message_id, status) VALUES (?1, 'Accepted')")
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
        }

        for (history_id, update_time) in &record.histories {
            sqlx::query(
                "INSERT INTO history_notifications (history_id, history_update_time, notification_id)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(history_id)
            .bind(ts(*update_time))
            .bind(notification_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(notification_id)
    }

    // ── Purge sweep support ──────────────────────────────────────

    /// Every history version linked to a Deletion notification, with the
    /// notification's sent time, oldest first.
    pub async fn deletion_links(&self) -> Result<Vec<DeletionLink>, LedgerError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT hn.history_id, n.sent
             FROM history_notifications hn
             JOIN notifications n ON n.id = hn.notification_id
             WHERE n.kind = 'Deletion'
             ORDER BY n.sent ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.into_iter()
            .map(|(history_id, sent)| {
                Ok(DeletionLink {
                    history_id,
                    notification_sent: parse_ts(&sent)?,
                })
            })
            .collect()
    }

    pub async fn history(&self, history_id: &str) -> Result<Option<StoredHistory>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, user_id, name, update_time, size, status FROM histories WHERE id = ?1",
        )
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        row.map(|row| {
            Ok(StoredHistory {
                id: row.get("id"),
                user_id: row.get("user_id"),
                name: row.get("name"),
                update_time: parse_ts(&row.get::<String, _>("update_time"))?,
                size: row.get("size"),
                status: row
                    .get::<Option<String>, _>("status")
                    .as_deref()
                    .and_then(HistoryStatus::parse),
            })
        })
        .transpose()
    }

    pub async fn set_history_status(
        &self,
        history_id: &str,
        status: HistoryStatus,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE histories SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(history_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    pub async fn notification_count(&self) -> Result<i64, LedgerError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn memory_ledger() -> Ledger {
        Ledger::connect("sqlite::memory:").await.unwrap()
    }

    fn at(days_ago: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() - Duration::days(days_ago)
    }

    fn sample_history(id: &str, update_time: DateTime<Utc>) -> History {
        History {
            id: id.into(),
            user_id: Some("u1".into()),
            name: format!("history {id}"),
            update_time,
            size: 2048,
        }
    }

    fn record(
        kind: NotificationKind,
        sent: DateTime<Utc>,
        histories: Vec<(String, DateTime<Utc>)>,
    ) -> NotificationRecord {
        NotificationRecord {
            user_id: "u1".into(),
            kind,
            sent,
            status: "success".into(),
            message_id: Some("msg-1".into()),
            histories,
        }
    }

    #[tokio::test]
    async fn unseen_version_returns_caller_default() {
        let ledger = memory_ledger().await;
        let now = at(0);
        assert!(ledger.eligibility("h1", at(100), true, 7, now).await.unwrap());
        assert!(!ledger.eligibility("h1", at(100), false, 7, now).await.unwrap());
    }

    #[tokio::test]
    async fn warning_inside_cooldown_blocks_resend() {
        let ledger = memory_ledger().await;
        let now = at(0);
        let version = at(100);
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                now - Duration::days(2),
                vec![("h1".into(), version)],
            ))
            .await
            .unwrap();
        assert!(!ledger.eligibility("h1", version, true, 7, now).await.unwrap());
    }

    #[tokio::test]
    async fn warning_outside_cooldown_allows_resend() {
        let ledger = memory_ledger().await;
        let now = at(0);
        let version = at(100);
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                now - Duration::days(30),
                vec![("h1".into(), version)],
            ))
            .await
            .unwrap();
        assert!(ledger.eligibility("h1", version, true, 7, now).await.unwrap());
        // And the deletion path sees the prior warning.
        assert!(ledger.eligibility("h1", version, false, 7, now).await.unwrap());
    }

    #[tokio::test]
    async fn deletion_notification_permanently_blocks_version() {
        let ledger = memory_ledger().await;
        let now = at(0);
        let version = at(200);
        ledger
            .record_notification(&record(
                NotificationKind::Deletion,
                now - Duration::days(60),
                vec![("h1".into(), version)],
            ))
            .await
            .unwrap();
        assert!(!ledger.eligibility("h1", version, true, 7, now).await.unwrap());
        assert!(!ledger.eligibility("h1", version, false, 7, now).await.unwrap());
    }

    #[tokio::test]
    async fn updated_version_resets_notification_history() {
        let ledger = memory_ledger().await;
        let now = at(0);
        let old_version = at(200);
        ledger
            .record_notification(&record(
                NotificationKind::Deletion,
                now - Duration::days(60),
                vec![("h1".into(), old_version)],
            ))
            .await
            .unwrap();

        // Same history id, fresh update_time: evaluated as a new version.
        let new_version = at(100);
        assert!(ledger.eligibility("h1", new_version, true, 7, now).await.unwrap());
    }

    #[tokio::test]
    async fn record_persists_notification_message_and_links() {
        let ledger = memory_ledger().await;
        let sent = at(10);
        let id = ledger
            .record_notification(&record(
                NotificationKind::Warning,
                sent,
                vec![("h1".into(), at(100)), ("h2".into(), at(110))],
            ))
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(ledger.notification_count().await.unwrap(), 1);

        let links: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM history_notifications WHERE notification_id = ?1",
        )
        .bind(id)
        .fetch_one(&ledger.pool)
        .await
        .unwrap();
        assert_eq!(links, 2);

        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(messages, 1);
    }

    #[tokio::test]
    async fn failed_send_records_no_message_receipt() {
        let ledger = memory_ledger().await;
        let mut rec = record(NotificationKind::Warning, at(10), vec![("h1".into(), at(100))]);
        rec.status = "Unable to send".into();
        rec.message_id = None;
        ledger.record_notification(&rec).await.unwrap();

        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(messages, 0);
    }

    #[tokio::test]
    async fn first_notified_at_returns_earliest_sent() {
        let ledger = memory_ledger().await;
        let version = at(150);
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                at(40),
                vec![("h1".into(), version)],
            ))
            .await
            .unwrap();
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                at(20),
                vec![("h1".into(), version)],
            ))
            .await
            .unwrap();
        let first = ledger.first_notified_at("h1", version).await.unwrap().unwrap();
        assert_eq!(first, at(40));
        assert!(ledger.first_notified_at("other", version).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deletion_links_exclude_warnings() {
        let ledger = memory_ledger().await;
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                at(50),
                vec![("warned".into(), at(100))],
            ))
            .await
            .unwrap();
        ledger
            .record_notification(&record(
                NotificationKind::Deletion,
                at(40),
                vec![("doomed".into(), at(160))],
            ))
            .await
            .unwrap();

        let links = ledger.deletion_links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].history_id, "doomed");
        assert_eq!(links[0].notification_sent, at(40));
    }

    #[tokio::test]
    async fn history_upsert_preserves_status_annotation() {
        let ledger = memory_ledger().await;
        let mut history = sample_history("h1", at(100));
        ledger.upsert_history(&history).await.unwrap();
        ledger
            .set_history_status("h1", HistoryStatus::Purged)
            .await
            .unwrap();

        // Re-fetching the same history must not clear the local annotation.
        history.size = 4096;
        ledger.upsert_history(&history).await.unwrap();
        let stored = ledger.history("h1").await.unwrap().unwrap();
        assert_eq!(stored.size, 4096);
        assert_eq!(stored.status, Some(HistoryStatus::Purged));
    }

    #[tokio::test]
    async fn history_snapshot_does_not_require_a_user_row() {
        let ledger = memory_ledger().await;
        // Owner lookup failed upstream; the history is snapshotted anyway.
        ledger
            .upsert_history(&sample_history("h1", at(100)))
            .await
            .unwrap();
        let stored = ledger.history("h1").await.unwrap().unwrap();
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn user_upsert_is_idempotent() {
        let ledger = memory_ledger().await;
        let user = UserDetails {
            id: "u1".into(),
            username: Some("alice".into()),
            email: Some("alice@example.org".into()),
            quota: None,
            quota_percent: None,
            total_disk_usage: Some(1024.0),
            nice_total_disk_usage: Some("1.0 KB".into()),
            is_admin: false,
            deleted: false,
            purged: false,
        };
        ledger.upsert_user(&user).await.unwrap();
        ledger.upsert_user(&user).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn drop_and_recreate_empties_the_ledger() {
        let ledger = memory_ledger().await;
        ledger
            .record_notification(&record(
                NotificationKind::Warning,
                at(10),
                vec![("h1".into(), at(100))],
            ))
            .await
            .unwrap();
        ledger.drop_and_recreate().await.unwrap();
        assert_eq!(ledger.notification_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn migrate_adds_status_column_to_legacy_schema() {
        // Simulate a pre-status database created by an older release.
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE histories (
                 id TEXT PRIMARY KEY,
                 user_id TEXT,
                 name TEXT NOT NULL,
                 update_time TEXT NOT NULL,
                 size INTEGER NOT NULL
             )",
        )
        .execute(&pool)
        .await
        .unwrap();

        let ledger = Ledger { pool };
        ledger.migrate().await.unwrap();
        let columns = ledger.table_columns("histories").await.unwrap();
        assert!(columns.iter().any(|c| c == "status"));
    }
}
