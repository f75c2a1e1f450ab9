use super::{
    EditableMessageHandle, OwnerId, PendingDraft, RowId, StorageError, StorageProvider, TotpEntry,
};
use crate::messenger::MessageId;
use crate::totp::normalize_secret;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// SQLite-backed entity store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, connection or migrations fail.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "TOTP database opened");

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migrations fail.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection that never expires, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("TOTP database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for SqliteStorage {
    async fn create_entry(
        &self,
        owner_id: OwnerId,
        name: &str,
        secret: &str,
    ) -> Result<RowId, StorageError> {
        let result = sqlx::query(
            "INSERT INTO totp_entries (owner_id, name, secret, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(name)
        .bind(normalize_secret(secret))
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_entries(&self, owner_id: OwnerId) -> Result<Vec<TotpEntry>, StorageError> {
        let entries = sqlx::query_as::<_, TotpEntry>(
            "SELECT * FROM totp_entries WHERE owner_id = ? ORDER BY name, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get_entry(&self, owner_id: OwnerId, id: RowId) -> Result<TotpEntry, StorageError> {
        sqlx::query_as::<_, TotpEntry>("SELECT * FROM totp_entries WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("TOTP {id}")))
    }

    async fn delete_entry(&self, owner_id: OwnerId, id: RowId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM totp_entries WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_draft(&self, owner_id: OwnerId) -> Result<RowId, StorageError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO pending_drafts (owner_id, name, updated_at) VALUES (?, NULL, ?) \
             ON CONFLICT (owner_id) DO UPDATE SET name = NULL, updated_at = excluded.updated_at \
             RETURNING id",
        )
        .bind(owner_id)
        .bind(unix_timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_draft(&self, owner_id: OwnerId) -> Result<Option<PendingDraft>, StorageError> {
        let draft =
            sqlx::query_as::<_, PendingDraft>("SELECT * FROM pending_drafts WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(draft)
    }

    async fn set_draft_name(
        &self,
        owner_id: OwnerId,
        id: RowId,
        name: &str,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE pending_drafts SET name = ?, updated_at = ? WHERE owner_id = ? AND id = ?",
        )
        .bind(name)
        .bind(unix_timestamp())
        .bind(owner_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("draft {id}")));
        }
        Ok(())
    }

    async fn delete_draft(&self, owner_id: OwnerId, id: RowId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM pending_drafts WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_drafts_older_than(&self, before: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM pending_drafts WHERE updated_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn create_handle(&self, owner_id: OwnerId) -> Result<RowId, StorageError> {
        let result = sqlx::query(
            "INSERT INTO editable_messages (owner_id, message_id, created_at) VALUES (?, NULL, ?)",
        )
        .bind(owner_id)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn backfill_handle(&self, id: RowId, message_id: MessageId) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE editable_messages SET message_id = ? WHERE id = ? AND message_id IS NULL",
        )
        .bind(message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("unattached handle {id}")));
        }
        Ok(())
    }

    async fn get_handle(&self, id: RowId) -> Result<EditableMessageHandle, StorageError> {
        sqlx::query_as::<_, EditableMessageHandle>("SELECT * FROM editable_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("handle {id}")))
    }

    async fn delete_handle(&self, id: RowId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM editable_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_handles_older_than(&self, before: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM editable_messages WHERE created_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
