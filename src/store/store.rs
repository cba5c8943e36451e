use crate::message::Message;
use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{PartialRecord, StoreStats};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

/// Durable, deduplicating repository of message metadata and content.
///
/// Fully received messages live in `messages`; content still being pushed
/// lives in `partials` plus one `partial_chunks` row per durable append.
/// Committing a partial moves it into `messages` in a single transaction, so
/// readers see either nothing or the whole message.
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Open (or create) a SQLite-backed store
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// Create store with in-memory database (for testing)
    pub async fn new_in_memory() -> StoreResult<Self> {
        // Each connection to an in-memory database sees its own copy, so the
        // pool is pinned to a single connection that is never recycled.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                meta TEXT NOT NULL,
                length INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                stored_at INTEGER NOT NULL,
                content BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partials (
                id TEXT PRIMARY KEY,
                meta TEXT NOT NULL,
                received INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partial_chunks (
                id TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (id, start_offset)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_expires ON messages(expires_at)")
            .execute(&pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_partials_expires ON partials(expires_at)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Atomically store a verified message and its content.
    ///
    /// Fails with `AlreadySeen` when the id is stored with the same digest and
    /// length, and with `MessageIdCollision` when it is stored with different
    /// ones. The stored row is never overwritten.
    pub async fn put(&self, message: &Message, content: &[u8]) -> StoreResult<()> {
        let meta_json = serde_json::to_string(message)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages
            (id, meta, length, sha256, expires_at, stored_at, content)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(meta_json)
        .bind(message.length as i64)
        .bind(message.digest_hex())
        .bind(instant_nanos(message.expires_at()))
        .bind(Utc::now().timestamp_millis())
        .bind(content)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.duplicate_of(message).await);
        }

        sqlx::query("DELETE FROM partial_chunks WHERE id = ?")
            .bind(&message.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM partials WHERE id = ?")
            .bind(&message.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn duplicate_of(&self, message: &Message) -> StoreError {
        match self.get(&message.id).await {
            Ok(Some(stored))
                if stored.sha256 == message.sha256 && stored.length == message.length =>
            {
                StoreError::AlreadySeen(message.id.clone())
            }
            Ok(Some(_)) => StoreError::MessageIdCollision(message.id.clone()),
            Ok(None) => StoreError::DatabaseError(format!(
                "insert of {} was ignored but no row exists",
                message.id
            )),
            Err(e) => e,
        }
    }

    /// Stored metadata, including messages that have expired but are not yet purged
    pub async fn get(&self, id: &str) -> StoreResult<Option<Message>> {
        let row = sqlx::query("SELECT meta FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_meta(&row)).transpose()
    }

    /// Whether a non-expired message with this id is fully stored
    pub async fn has_content(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let row =
            sqlx::query("SELECT COUNT(*) as count FROM messages WHERE id = ? AND expires_at >= ?")
                .bind(id)
                .bind(instant_nanos(now))
                .fetch_one(&self.pool)
                .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    /// Lazily enumerate metadata of every non-expired stored message.
    ///
    /// The enumeration runs as a single read statement, so it sees a
    /// consistent snapshot and never a half-committed message.
    pub fn manifest(&self, now: DateTime<Utc>) -> BoxStream<'_, StoreResult<Message>> {
        sqlx::query("SELECT meta FROM messages WHERE expires_at >= ? ORDER BY stored_at, id")
            .bind(instant_nanos(now))
            .fetch(&self.pool)
            .map(|row| -> StoreResult<Message> { decode_meta(&row?) })
            .boxed()
    }

    /// Ids of every non-expired stored message
    pub async fn ids(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM messages WHERE expires_at >= ? ORDER BY stored_at, id")
            .bind(instant_nanos(now))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }

    /// Read up to `len` bytes of stored content starting at `offset`
    pub async fn read_content(&self, id: &str, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        let row = sqlx::query("SELECT substr(content, ?, ?) AS part FROM messages WHERE id = ?")
            .bind(offset as i64 + 1)
            .bind(len as i64)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let part: Option<Vec<u8>> = row.try_get("part")?;
        Ok(part.unwrap_or_default())
    }

    /// Delete a stored message and any partial content for it
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let partial = sqlx::query("DELETE FROM partials WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM partial_chunks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() + partial.rows_affected() > 0)
    }

    /// Physically remove expired messages and expired partial content.
    /// Returns the ids of removed messages.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let cutoff = instant_nanos(now);

        let rows = sqlx::query("DELETE FROM messages WHERE expires_at < ? RETURNING id")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        let mut purged = Vec::with_capacity(rows.len());
        for row in rows {
            purged.push(row.try_get::<String, _>("id")?);
        }

        let stale = sqlx::query("SELECT id FROM partials WHERE expires_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        for row in stale {
            let id: String = row.try_get("id")?;
            self.discard_partial(&id).await?;
        }

        Ok(purged)
    }

    /// Partial content state for `id`, if a push has started
    pub async fn partial(&self, id: &str) -> StoreResult<Option<PartialRecord>> {
        let row = sqlx::query("SELECT meta, received, updated_at FROM partials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(PartialRecord {
            message: decode_meta(&row)?,
            received: row.try_get::<i64, _>("received")? as u64,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Record the start of a push for `message`. No-op if one is recorded.
    pub async fn begin_partial(&self, message: &Message) -> StoreResult<()> {
        let meta_json = serde_json::to_string(message)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO partials (id, meta, received, expires_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(meta_json)
        .bind(instant_nanos(message.expires_at()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Durably append `data` at `offset`, returning the new received count.
    ///
    /// The append only applies when `offset` equals the durable count, so two
    /// writers can never interleave bytes for the same id.
    pub async fn append_partial(&self, id: &str, offset: u64, data: &[u8]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE partials SET received = received + ?, updated_at = ? WHERE id = ? AND received = ?",
        )
        .bind(data.len() as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(offset as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let stored = self.received_bytes(id).await?;
            return Err(StoreError::OffsetMismatch {
                id: id.to_string(),
                stored,
                requested: offset,
            });
        }

        sqlx::query("INSERT INTO partial_chunks (id, start_offset, data) VALUES (?, ?, ?)")
            .bind(id)
            .bind(offset as i64)
            .bind(data)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(offset + data.len() as u64)
    }

    /// Durable byte count of partial content for `id` (0 if none)
    pub async fn received_bytes(&self, id: &str) -> StoreResult<u64> {
        let row = sqlx::query("SELECT received FROM partials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<i64, _>("received")? as u64),
            None => Ok(0),
        }
    }

    /// All durable partial content for `id`, in offset order
    pub async fn read_partial(&self, id: &str) -> StoreResult<Vec<u8>> {
        let rows =
            sqlx::query("SELECT data FROM partial_chunks WHERE id = ? ORDER BY start_offset")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let mut content = Vec::new();
        for row in rows {
            let data: Vec<u8> = row.try_get("data")?;
            content.extend_from_slice(&data);
        }
        Ok(content)
    }

    /// Promote fully received partial content to a stored message
    pub async fn commit_partial(&self, message: &Message) -> StoreResult<()> {
        let content = self.read_partial(&message.id).await?;
        self.put(message, &content).await
    }

    /// Drop partial content for `id`, resetting its offset to zero
    pub async fn discard_partial(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM partials WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM partial_chunks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let messages = sqlx::query(
            "SELECT COUNT(*) as count, COALESCE(SUM(length), 0) as bytes FROM messages",
        )
        .fetch_one(&self.pool)
        .await?;

        let partials = sqlx::query(
            "SELECT COUNT(*) as count, COALESCE(SUM(received), 0) as bytes FROM partials",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            messages: messages.try_get::<i64, _>("count")? as u64,
            content_bytes: messages.try_get::<i64, _>("bytes")? as u64,
            partials: partials.try_get::<i64, _>("count")? as u64,
            partial_bytes: partials.try_get::<i64, _>("bytes")? as u64,
        })
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Nanoseconds since the epoch, clamped to the i64 range. Expiry columns use
/// this so row filters agree exactly with `Message::is_expired_at`.
fn instant_nanos(at: DateTime<Utc>) -> i64 {
    match at.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if at.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

fn decode_meta(row: &SqliteRow) -> StoreResult<Message> {
    let json: String = row.try_get("meta")?;
    Ok(serde_json::from_str(&json)?)
}
