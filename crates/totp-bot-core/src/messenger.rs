//! Outbound messaging capability.
//!
//! The dispatch engine only talks to the chat platform through [`Messenger`];
//! the Telegram transport implements it on top of teloxide.

use async_trait::async_trait;
use thiserror::Error;

/// Chat the event came from and replies go to
pub type ChatId = i64;
/// Transport-assigned message identifier
pub type MessageId = i32;

/// Send, edit or delete failed at the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Inline button: visible label plus the callback payload it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    /// Visible text
    pub label: String,
    /// Callback data sent back when pressed
    pub payload: String,
}

impl InlineButton {
    /// Create a button.
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Chat platform operations used by the dispatch engine
///
/// Failures are reported but never retried by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send plain text, optionally with the quick-reply command keyboard
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        with_quick_replies: bool,
    ) -> Result<MessageId, TransportError>;
    /// Send text with one inline button per row
    async fn send_with_inline_buttons(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<MessageId, TransportError>;
    /// Replace the text of a sent message, dropping its buttons
    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), TransportError>;
    /// Delete a message from the chat
    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError>;
    /// Show the "typing" indicator
    async fn show_typing(&self, chat_id: ChatId) -> Result<(), TransportError>;
}
