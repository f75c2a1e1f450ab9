use crate::messenger::MessageId;

/// A completed, usable TOTP secret
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TotpEntry {
    /// Row id
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// User-chosen label
    pub name: String,
    /// Base32 seed, upper-case without whitespace
    pub secret: String,
    /// Creation time (unix seconds)
    pub created_at: i64,
}

/// A TOTP entry under construction
///
/// `name == None` means the dialog awaits a name, otherwise it awaits the secret.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PendingDraft {
    /// Row id
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// Name entered so far
    pub name: Option<String>,
    /// Last modification (unix seconds)
    pub updated_at: i64,
}

/// Correlates buttons on a sent message with that message
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EditableMessageHandle {
    /// Handle id embedded in callback payloads
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// Message carrying the buttons, once it was sent
    pub message_id: Option<MessageId>,
    /// Creation time (unix seconds)
    pub created_at: i64,
}
