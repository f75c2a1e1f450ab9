//! Editable-message handles.
//!
//! A handle is reserved before a message with buttons is sent (its id goes
//! into every button payload), attached to the message id once the send
//! succeeds, and consumed by the first button press that edits the message.

use crate::command::HandleId;
use crate::messenger::MessageId;
use crate::storage::{OwnerId, StorageError, StorageProvider};
use std::sync::Arc;
use tracing::{debug, warn};

/// Single-use correlation between a button press and the message to edit
pub struct MessageRegistry {
    storage: Arc<dyn StorageProvider>,
}

impl MessageRegistry {
    /// Create a registry over the entity store.
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    /// Reserve a handle for a message about to be sent.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the handle cannot be created.
    pub async fn reserve(&self, owner_id: OwnerId) -> Result<HandleId, StorageError> {
        self.storage.create_handle(owner_id).await
    }

    /// Bind a reserved handle to the message that was actually sent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the handle is unknown or already attached.
    pub async fn attach(&self, handle: HandleId, message_id: MessageId) -> Result<(), StorageError> {
        self.storage.backfill_handle(handle, message_id).await
    }

    /// Drop a reservation whose message never went out.
    pub async fn release(&self, handle: HandleId) {
        if let Err(e) = self.storage.delete_handle(handle).await {
            warn!(handle = handle, "Failed to release editable message handle: {e}");
        }
    }

    /// Resolve a handle to its message and delete it so it cannot be reused.
    ///
    /// A handle that belongs to another owner, was already consumed, or has
    /// not been attached yet resolves to `NotFound`. An unattached handle is
    /// left in place for the pending attach.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` as above, or a storage failure.
    pub async fn resolve_and_consume(
        &self,
        owner_id: OwnerId,
        handle: HandleId,
    ) -> Result<MessageId, StorageError> {
        let record = self.storage.get_handle(handle).await?;
        if record.owner_id != owner_id {
            return Err(StorageError::NotFound(format!("handle {handle}")));
        }
        let Some(message_id) = record.message_id else {
            return Err(StorageError::NotFound(format!("unattached handle {handle}")));
        };

        // A concurrent press may have consumed it between the two calls
        if !self.storage.delete_handle(handle).await? {
            return Err(StorageError::NotFound(format!("handle {handle}")));
        }

        debug!(owner_id = owner_id, handle = handle, "Consumed editable message handle");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn registry() -> MessageRegistry {
        let storage = SqliteStorage::open_in_memory()
            .await
            .expect("in-memory database");
        MessageRegistry::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_handle_lifecycle() -> Result<(), StorageError> {
        let registry = registry().await;
        let handle = registry.reserve(1).await?;
        registry.attach(handle, 42).await?;

        assert_eq!(registry.resolve_and_consume(1, handle).await?, 42);
        assert!(registry
            .resolve_and_consume(1, handle)
            .await
            .is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn test_press_before_attach_is_not_found() -> Result<(), StorageError> {
        let registry = registry().await;
        let handle = registry.reserve(1).await?;

        assert!(registry
            .resolve_and_consume(1, handle)
            .await
            .is_err_and(|e| e.is_not_found()));

        // The reservation survives and can still be completed
        registry.attach(handle, 7).await?;
        assert_eq!(registry.resolve_and_consume(1, handle).await?, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_other_owner_cannot_consume() -> Result<(), StorageError> {
        let registry = registry().await;
        let handle = registry.reserve(1).await?;
        registry.attach(handle, 42).await?;

        assert!(registry
            .resolve_and_consume(2, handle)
            .await
            .is_err_and(|e| e.is_not_found()));
        assert_eq!(registry.resolve_and_consume(1, handle).await?, 42);
        Ok(())
    }

    #[tokio::test]
    async fn test_released_handle_is_gone() -> Result<(), StorageError> {
        let registry = registry().await;
        let handle = registry.reserve(1).await?;
        registry.release(handle).await;

        assert!(registry.attach(handle, 1).await.is_err());
        Ok(())
    }
}
