//! Storage layer for TOTP entries, creation drafts and editable-message handles
//!
//! Pure data access: every business rule lives in the dialog tracker, the
//! message registry or the dispatch engine.

mod models;
mod sqlite;

pub use models::{EditableMessageHandle, PendingDraft, TotpEntry};
pub use sqlite::SqliteStorage;

use crate::messenger::MessageId;
use async_trait::async_trait;
use thiserror::Error;

/// Identity of the user owning entries, drafts and handles
pub type OwnerId = i64;
/// Auto-assigned row id
pub type RowId = i64;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Row absent, or owned by somebody else
    #[error("not found: {0}")]
    NotFound(String),
    /// Query or connection failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Schema migration failure
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// Standard I/O error (creating the database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error means the row does not exist
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Interface for the entity store
///
/// Reads fail with [`StorageError::NotFound`] when the row does not exist,
/// except [`list_entries`](Self::list_entries) (empty list) and
/// [`get_draft`](Self::get_draft) (absence is a dialog state).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Persist a TOTP entry, normalizing the secret; returns the new id
    async fn create_entry(
        &self,
        owner_id: OwnerId,
        name: &str,
        secret: &str,
    ) -> Result<RowId, StorageError>;
    /// All entries of an owner
    async fn list_entries(&self, owner_id: OwnerId) -> Result<Vec<TotpEntry>, StorageError>;
    /// One entry of an owner
    async fn get_entry(&self, owner_id: OwnerId, id: RowId) -> Result<TotpEntry, StorageError>;
    /// Delete an entry; succeeds when it is already gone
    async fn delete_entry(&self, owner_id: OwnerId, id: RowId) -> Result<(), StorageError>;

    /// Create the owner's draft, or reset the existing one to awaiting-name
    async fn create_draft(&self, owner_id: OwnerId) -> Result<RowId, StorageError>;
    /// The owner's in-flight draft, if any
    async fn get_draft(&self, owner_id: OwnerId) -> Result<Option<PendingDraft>, StorageError>;
    /// Record the name of a draft
    async fn set_draft_name(
        &self,
        owner_id: OwnerId,
        id: RowId,
        name: &str,
    ) -> Result<(), StorageError>;
    /// Delete a draft; succeeds when it is already gone
    async fn delete_draft(&self, owner_id: OwnerId, id: RowId) -> Result<(), StorageError>;
    /// Delete drafts last touched before `before`; returns how many were removed
    async fn delete_drafts_older_than(&self, before: i64) -> Result<u64, StorageError>;

    /// Create a handle whose message id is not known yet
    async fn create_handle(&self, owner_id: OwnerId) -> Result<RowId, StorageError>;
    /// Fill in the message id of a handle; only once
    async fn backfill_handle(&self, id: RowId, message_id: MessageId) -> Result<(), StorageError>;
    /// Look a handle up by id
    async fn get_handle(&self, id: RowId) -> Result<EditableMessageHandle, StorageError>;
    /// Delete a handle; `false` when there was nothing to delete
    async fn delete_handle(&self, id: RowId) -> Result<bool, StorageError>;
    /// Delete handles created before `before`; returns how many were removed
    async fn delete_handles_older_than(&self, before: i64) -> Result<u64, StorageError>;
}
