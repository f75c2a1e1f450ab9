//! Pending-dialog tracking for multi-step TOTP creation.
//!
//! Each owner is in exactly one [`DialogState`]. The state is persisted as the
//! owner's draft row, so it survives restarts, and drafts idle for longer than
//! the configured TTL count as abandoned.

use crate::storage::{OwnerId, PendingDraft, RowId, StorageError, StorageProvider};
use crate::totp::Clock;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Where an owner is in the creation dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    /// No creation in progress
    NoDialog,
    /// Next free text is the entry name
    AwaitingName {
        /// Draft row
        draft_id: RowId,
    },
    /// Next free text is the secret
    AwaitingSecret {
        /// Draft row
        draft_id: RowId,
        /// Name entered in the previous step
        name: String,
    },
    /// A named draft outlived the TTL and was dropped. The message that
    /// arrived now is most likely the secret.
    Expired {
        /// Name of the dropped draft
        name: String,
    },
}

impl From<Option<PendingDraft>> for DialogState {
    fn from(draft: Option<PendingDraft>) -> Self {
        match draft {
            None => Self::NoDialog,
            Some(PendingDraft {
                id, name: None, ..
            }) => Self::AwaitingName { draft_id: id },
            Some(PendingDraft {
                id, name: Some(name), ..
            }) => Self::AwaitingSecret { draft_id: id, name },
        }
    }
}

/// State machine over the draft records of the entity store
pub struct DialogTracker {
    storage: Arc<dyn StorageProvider>,
    clock: Arc<dyn Clock>,
    draft_ttl_secs: u64,
}

impl DialogTracker {
    /// Create a tracker; `draft_ttl_secs == 0` disables expiry.
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        clock: Arc<dyn Clock>,
        draft_ttl_secs: u64,
    ) -> Self {
        Self {
            storage,
            clock,
            draft_ttl_secs,
        }
    }

    /// Current state of `owner_id`, dropping an expired draft on the way.
    ///
    /// An expired draft that already had a name yields
    /// [`DialogState::Expired`]; an unnamed one yields `NoDialog`.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the draft cannot be read.
    pub async fn state(&self, owner_id: OwnerId) -> Result<DialogState, StorageError> {
        let draft = self.storage.get_draft(owner_id).await?;

        if let Some(expired) = draft.as_ref().filter(|d| self.is_expired(d)) {
            info!(
                owner_id = owner_id,
                draft_id = expired.id,
                "Dropping expired TOTP draft"
            );
            if let Err(e) = self.storage.delete_draft(owner_id, expired.id).await {
                error!(owner_id = owner_id, "Failed to delete expired draft: {e}");
            }
            return Ok(expired
                .name
                .clone()
                .map_or(DialogState::NoDialog, |name| DialogState::Expired { name }));
        }

        Ok(draft.into())
    }

    /// Enter `AwaitingName`. An existing draft is reused and its name cleared.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the draft cannot be written.
    pub async fn begin(&self, owner_id: OwnerId) -> Result<RowId, StorageError> {
        let draft_id = self.storage.create_draft(owner_id).await?;
        debug!(owner_id = owner_id, draft_id = draft_id, "Awaiting TOTP name");
        Ok(draft_id)
    }

    /// `AwaitingName` to `AwaitingSecret`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the draft vanished meanwhile.
    pub async fn accept_name(
        &self,
        owner_id: OwnerId,
        draft_id: RowId,
        name: &str,
    ) -> Result<(), StorageError> {
        self.storage.set_draft_name(owner_id, draft_id, name).await?;
        debug!(owner_id = owner_id, draft_id = draft_id, "Awaiting TOTP secret");
        Ok(())
    }

    /// `AwaitingSecret` to `NoDialog`: persist the entry, then drop the draft.
    ///
    /// If the entry cannot be created the draft stays, so the user can resend
    /// the secret.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the entry cannot be created.
    pub async fn accept_secret(
        &self,
        owner_id: OwnerId,
        draft_id: RowId,
        name: &str,
        secret: &str,
    ) -> Result<RowId, StorageError> {
        let entry_id = self.storage.create_entry(owner_id, name, secret).await?;

        // The entry exists now; a leftover draft is only a nuisance
        if let Err(e) = self.storage.delete_draft(owner_id, draft_id).await {
            error!(
                owner_id = owner_id,
                draft_id = draft_id,
                "Failed to delete completed draft: {e}"
            );
        }
        Ok(entry_id)
    }

    /// Abandon whatever dialog is in progress. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the draft cannot be read or deleted.
    pub async fn abandon(&self, owner_id: OwnerId) -> Result<bool, StorageError> {
        match self.storage.get_draft(owner_id).await? {
            Some(draft) => {
                self.storage.delete_draft(owner_id, draft.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_expired(&self, draft: &PendingDraft) -> bool {
        let Ok(ttl) = i64::try_from(self.draft_ttl_secs) else {
            return false;
        };
        ttl > 0 && self.clock.now() - draft.updated_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockStorageProvider, SqliteStorage};
    use crate::totp::{MockClock, SystemClock};

    async fn tracker(ttl: u64) -> (DialogTracker, Arc<SqliteStorage>) {
        let storage = Arc::new(
            SqliteStorage::open_in_memory()
                .await
                .expect("in-memory database"),
        );
        (
            DialogTracker::new(storage.clone(), Arc::new(SystemClock), ttl),
            storage,
        )
    }

    #[tokio::test]
    async fn test_full_dialog() -> Result<(), StorageError> {
        let (dialogs, storage) = tracker(0).await;
        assert_eq!(dialogs.state(5).await?, DialogState::NoDialog);

        let draft_id = dialogs.begin(5).await?;
        assert_eq!(
            dialogs.state(5).await?,
            DialogState::AwaitingName { draft_id }
        );

        dialogs.accept_name(5, draft_id, "My Mail").await?;
        assert_eq!(
            dialogs.state(5).await?,
            DialogState::AwaitingSecret {
                draft_id,
                name: "My Mail".to_string()
            }
        );

        let entry_id = dialogs
            .accept_secret(5, draft_id, "My Mail", "abcd efgh")
            .await?;
        assert_eq!(dialogs.state(5).await?, DialogState::NoDialog);
        assert_eq!(storage.get_entry(5, entry_id).await?.secret, "ABCDEFGH");
        Ok(())
    }

    #[tokio::test]
    async fn test_conflicting_begin_keeps_single_draft() -> Result<(), StorageError> {
        let (dialogs, _storage) = tracker(0).await;
        let first = dialogs.begin(5).await?;
        dialogs.accept_name(5, first, "Mail").await?;

        let second = dialogs.begin(5).await?;
        assert_eq!(first, second);
        assert_eq!(
            dialogs.state(5).await?,
            DialogState::AwaitingName { draft_id: first }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_draft_is_dropped() -> Result<(), StorageError> {
        let storage = Arc::new(SqliteStorage::open_in_memory().await?);
        storage.create_draft(5).await?;

        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| chrono::Utc::now().timestamp() + 3600);
        let dialogs = DialogTracker::new(storage.clone(), Arc::new(clock), 600);

        assert_eq!(dialogs.state(5).await?, DialogState::NoDialog);
        assert_eq!(storage.get_draft(5).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_named_draft_reports_name() -> Result<(), StorageError> {
        let storage = Arc::new(SqliteStorage::open_in_memory().await?);
        let draft_id = storage.create_draft(5).await?;
        storage.set_draft_name(5, draft_id, "Mail").await?;

        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| chrono::Utc::now().timestamp() + 601);
        let dialogs = DialogTracker::new(storage.clone(), Arc::new(clock), 600);

        assert_eq!(
            dialogs.state(5).await?,
            DialogState::Expired {
                name: "Mail".to_string()
            }
        );
        assert_eq!(storage.get_draft(5).await?, None);
        assert_eq!(dialogs.state(5).await?, DialogState::NoDialog);
        Ok(())
    }

    #[tokio::test]
    async fn test_abandon() -> Result<(), StorageError> {
        let (dialogs, _storage) = tracker(0).await;
        assert!(!dialogs.abandon(5).await?);

        dialogs.begin(5).await?;
        assert!(dialogs.abandon(5).await?);
        assert_eq!(dialogs.state(5).await?, DialogState::NoDialog);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_entry_keeps_draft() {
        let mut storage = MockStorageProvider::new();
        storage
            .expect_create_entry()
            .returning(|_, _, _| Err(StorageError::NotFound("disk gone".into())));
        storage.expect_delete_draft().never();

        let dialogs = DialogTracker::new(Arc::new(storage), Arc::new(SystemClock), 0);
        let result = dialogs.accept_secret(5, 1, "Mail", "AAAA").await;
        assert!(result.is_err());
    }
}
