//! Bot API implementation of the core `Messenger` capability.
//!
//! Every call is attempted once. Edits that Telegram refuses because nothing
//! changed or the message is already gone are treated as done.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    MessageId,
};
use teloxide::RequestError;
use totp_bot_core::command::Command;
use totp_bot_core::messenger::{self, InlineButton, Messenger, TransportError};
use tracing::debug;

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_EDIT_NOT_FOUND: &str = "message to edit not found";

/// Telegram `Messenger` backed by a teloxide `Bot`
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Reply keyboard with the menu commands, three per row.
#[must_use]
pub fn quick_reply_keyboard() -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = Command::MENU
        .chunks(3)
        .map(|row| row.iter().map(|c| KeyboardButton::new(c.token())).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard()
}

/// One inline button per row.
#[must_use]
pub fn inline_keyboard(buttons: &[InlineButton]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(buttons.iter().map(|b| {
        vec![InlineKeyboardButton::callback(
            b.label.clone(),
            b.payload.clone(),
        )]
    }))
}

/// Whether a failed edit left the chat in the intended state anyway.
fn is_benign_edit_error(error: &str) -> bool {
    error.contains(ERROR_NOT_MODIFIED) || error.contains(ERROR_EDIT_NOT_FOUND)
}

fn transport_error(operation: &str, e: &RequestError) -> TransportError {
    TransportError(format!("Telegram {operation} error: {e}"))
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat_id: messenger::ChatId,
        text: &str,
        with_quick_replies: bool,
    ) -> Result<messenger::MessageId, TransportError> {
        let mut req = self.bot.send_message(ChatId(chat_id), text);
        if with_quick_replies {
            req = req.reply_markup(quick_reply_keyboard());
        }
        req.await
            .map(|msg| msg.id.0)
            .map_err(|e| transport_error("send", &e))
    }

    async fn send_with_inline_buttons(
        &self,
        chat_id: messenger::ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<messenger::MessageId, TransportError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(inline_keyboard(buttons))
            .await
            .map(|msg| msg.id.0)
            .map_err(|e| transport_error("send", &e))
    }

    async fn edit_message_text(
        &self,
        chat_id: messenger::ChatId,
        message_id: messenger::MessageId,
        text: &str,
    ) -> Result<(), TransportError> {
        match self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_benign_edit_error(&e.to_string()) => {
                debug!("Message update skipped: {e}");
                Ok(())
            }
            Err(e) => Err(transport_error("edit", &e)),
        }
    }

    async fn delete_message(
        &self,
        chat_id: messenger::ChatId,
        message_id: messenger::MessageId,
    ) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(|e| transport_error("delete", &e))
    }

    async fn show_typing(&self, chat_id: messenger::ChatId) -> Result<(), TransportError> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| transport_error("chat action", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn test_quick_replies_cover_menu() {
        let keyboard = quick_reply_keyboard();
        let labels: Vec<&str> = keyboard
            .keyboard
            .iter()
            .flatten()
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(labels, ["/otp", "/new", "/list", "/del", "/privacy", "/help"]);
    }

    #[test]
    fn test_inline_keyboard_one_button_per_row() {
        let markup = inline_keyboard(&[
            InlineButton::new("Mail", "/otp 1,9"),
            InlineButton::new("Cancel", "/cancel 9"),
        ]);
        assert_eq!(markup.inline_keyboard.len(), 2);
        let first = &markup.inline_keyboard[0][0];
        assert_eq!(first.text, "Mail");
        assert!(matches!(
            &first.kind,
            InlineKeyboardButtonKind::CallbackData(data) if data == "/otp 1,9"
        ));
    }

    #[test]
    fn test_benign_edit_errors() {
        assert!(is_benign_edit_error(
            "A Telegram's error: Bad Request: message is not modified"
        ));
        assert!(is_benign_edit_error("Bad Request: message to edit not found"));
        assert!(!is_benign_edit_error("Forbidden: bot was blocked by the user"));
    }
}
