//! Inbound event dispatch.
//!
//! [`DispatchEngine`] turns inbound text messages and button presses into
//! dialog transitions, store mutations and outbound messages. It is the error
//! boundary of the core: nothing it handles is fatal, storage and protocol
//! errors become replies, transport errors become log lines.

use crate::command::{CallbackAction, Command, HandleId, TextInput};
use crate::config::CoreSettings;
use crate::dialog::{DialogState, DialogTracker};
use crate::messenger::{ChatId, InlineButton, MessageId, Messenger};
use crate::registry::MessageRegistry;
use crate::storage::{OwnerId, RowId, StorageError, StorageProvider};
use crate::totp::{normalize_secret, seconds_remaining, Clock, CodeGenerator, Rfc6238, SystemClock};
use crate::views::{DefaultTotpView as View, TotpView};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A text (or text-less) message from a user
#[derive(Debug, Clone)]
pub struct InboundText {
    /// Sender
    pub owner_id: OwnerId,
    /// Chat to reply to
    pub chat_id: ChatId,
    /// The message itself, so it can be deleted
    pub message_id: MessageId,
    /// Text, absent for stickers, photos and the like
    pub text: Option<String>,
}

/// A press on an inline button
#[derive(Debug, Clone)]
pub struct InboundCallback {
    /// User who pressed
    pub owner_id: OwnerId,
    /// Chat holding the message with the button
    pub chat_id: ChatId,
    /// Callback payload
    pub data: Option<String>,
}

/// Which selection keyboard to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Delete,
    Generate,
}

impl Selection {
    fn prompt(self) -> &'static str {
        match self {
            Self::Delete => View::select_to_delete(),
            Self::Generate => View::select_to_generate(),
        }
    }

    const fn action(self, entry_id: RowId, handle: HandleId) -> CallbackAction {
        match self {
            Self::Delete => CallbackAction::Delete { entry_id, handle },
            Self::Generate => CallbackAction::Generate { entry_id, handle },
        }
    }
}

/// The conversation state machine
pub struct DispatchEngine {
    storage: Arc<dyn StorageProvider>,
    messenger: Arc<dyn Messenger>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    dialogs: DialogTracker,
    registry: MessageRegistry,
    project_url: String,
    bot_username: Option<String>,
}

impl DispatchEngine {
    /// Engine with the RFC 6238 generator and the wall clock.
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        messenger: Arc<dyn Messenger>,
        settings: &CoreSettings,
    ) -> Self {
        Self::with_parts(
            storage,
            messenger,
            Arc::new(Rfc6238),
            Arc::new(SystemClock),
            settings,
        )
    }

    /// Engine with an explicit code generator and clock.
    pub fn with_parts(
        storage: Arc<dyn StorageProvider>,
        messenger: Arc<dyn Messenger>,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            dialogs: DialogTracker::new(storage.clone(), clock.clone(), settings.draft_ttl_secs),
            registry: MessageRegistry::new(storage.clone()),
            storage,
            messenger,
            codes,
            clock,
            project_url: settings.project_url.clone(),
            bot_username: None,
        }
    }

    /// Only answer `/cmd@name` commands addressed to `username`.
    #[must_use]
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Handle an inbound message.
    pub async fn handle_text(&self, event: InboundText) {
        let Some(text) = event.text.as_deref() else {
            self.reply(event.chat_id, View::invalid_message_type(), true)
                .await;
            return;
        };

        match TextInput::classify(text, self.bot_username.as_deref()) {
            TextInput::Command(command) => self.handle_command(&event, command).await,
            TextInput::UnknownCommand(text) => {
                warn!(owner_id = event.owner_id, "Unknown command: {text}");
                self.reply(event.chat_id, &View::no_such_command(text), true)
                    .await;
            }
            TextInput::FreeText(text) => self.handle_free_text(&event, text).await,
            TextInput::ForOtherBot => {
                debug!(owner_id = event.owner_id, "Ignoring command for another bot");
            }
        }
    }

    /// Handle an inline button press.
    pub async fn handle_callback(&self, event: InboundCallback) {
        let Some(data) = event.data.as_deref() else {
            self.reply(event.chat_id, View::empty_callback(), false)
                .await;
            return;
        };

        self.typing(event.chat_id).await;

        let action = match CallbackAction::decode(data) {
            Ok(action) => action,
            Err(e) => {
                warn!(owner_id = event.owner_id, "Rejected callback: {e}");
                self.reply(event.chat_id, &View::invalid_callback(data), false)
                    .await;
                return;
            }
        };

        match action {
            CallbackAction::Delete { entry_id, handle } => {
                self.delete_entry(&event, entry_id, handle).await;
            }
            CallbackAction::Generate { entry_id, handle } => {
                self.generate_code(&event, entry_id, handle).await;
            }
            CallbackAction::Cancel { handle } => {
                self.finish_selection(&event, handle, View::canceled())
                    .await;
            }
            CallbackAction::Help => {
                self.reply(event.chat_id, &View::help_message(&self.project_url), true)
                    .await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Text commands
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_command(&self, event: &InboundText, command: Command) {
        info!(owner_id = event.owner_id, "Command {}", command.token());

        match command {
            Command::Start | Command::Help => {
                self.reply(event.chat_id, &View::help_message(&self.project_url), true)
                    .await;
            }
            Command::Privacy => {
                self.reply(event.chat_id, &View::privacy_message(&self.project_url), true)
                    .await;
            }
            Command::New => self.begin_dialog(event).await,
            Command::List => self.list_entries(event).await,
            Command::Delete => self.show_selection(event, Selection::Delete).await,
            Command::Otp => self.show_selection(event, Selection::Generate).await,
            Command::Cancel => self.abandon_dialog(event).await,
        }
    }

    async fn begin_dialog(&self, event: &InboundText) {
        match self.dialogs.begin(event.owner_id).await {
            Ok(_) => self.reply(event.chat_id, View::input_name(), false).await,
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to create draft: {e}");
                self.reply(event.chat_id, &View::failed("start a new TOTP", &e), false)
                    .await;
            }
        }
    }

    async fn abandon_dialog(&self, event: &InboundText) {
        match self.dialogs.abandon(event.owner_id).await {
            Ok(true) => {
                self.reply(event.chat_id, View::creation_canceled(), true)
                    .await;
            }
            Ok(false) => {
                self.reply(event.chat_id, View::nothing_to_cancel(), true)
                    .await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to abandon draft: {e}");
                self.reply(event.chat_id, &View::failed("cancel", &e), false)
                    .await;
            }
        }
    }

    async fn list_entries(&self, event: &InboundText) {
        self.typing(event.chat_id).await;

        match self.storage.list_entries(event.owner_id).await {
            Ok(entries) if entries.is_empty() => {
                self.reply(event.chat_id, View::no_totp(), true).await;
            }
            Ok(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                self.reply(event.chat_id, &View::totp_list(&names), true)
                    .await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to list TOTPs: {e}");
                self.reply(event.chat_id, &View::failed("list your TOTPs", &e), false)
                    .await;
            }
        }
    }

    async fn show_selection(&self, event: &InboundText, selection: Selection) {
        self.typing(event.chat_id).await;

        let entries = match self.storage.list_entries(event.owner_id).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to list TOTPs: {e}");
                self.reply(event.chat_id, &View::failed("list your TOTPs", &e), false)
                    .await;
                return;
            }
        };
        if entries.is_empty() {
            self.reply(event.chat_id, View::no_totp(), true).await;
            return;
        }

        let handle = match self.registry.reserve(event.owner_id).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to reserve handle: {e}");
                self.reply(event.chat_id, &View::failed("list your TOTPs", &e), false)
                    .await;
                return;
            }
        };

        let mut buttons: Vec<InlineButton> = entries
            .iter()
            .map(|entry| InlineButton::new(&entry.name, selection.action(entry.id, handle).encode()))
            .collect();
        buttons.push(InlineButton::new(
            View::cancel_label(),
            CallbackAction::Cancel { handle }.encode(),
        ));

        match self
            .messenger
            .send_with_inline_buttons(event.chat_id, selection.prompt(), &buttons)
            .await
        {
            Ok(message_id) => {
                if let Err(e) = self.registry.attach(handle, message_id).await {
                    error!(handle = handle, "Failed to attach editable message: {e}");
                }
            }
            Err(e) => {
                warn!(chat_id = event.chat_id, "Failed to send selection: {e}");
                self.registry.release(handle).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation dialog
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_free_text(&self, event: &InboundText, text: &str) {
        self.typing(event.chat_id).await;

        match self.dialogs.state(event.owner_id).await {
            Ok(DialogState::NoDialog) => {
                self.reply(event.chat_id, &View::help_message(&self.project_url), true)
                    .await;
            }
            Ok(DialogState::AwaitingName { draft_id }) => {
                self.accept_name(event, draft_id, text).await;
            }
            Ok(DialogState::AwaitingSecret { draft_id, name }) => {
                self.accept_secret(event, draft_id, &name, text).await;
            }
            Ok(DialogState::Expired { name }) => {
                // Probably the secret for the dropped draft
                self.delete_quietly(event.chat_id, event.message_id).await;
                self.reply(event.chat_id, &View::creation_timed_out(&name), true)
                    .await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to read draft: {e}");
                self.reply(event.chat_id, &View::failed("read your input", &e), false)
                    .await;
            }
        }
    }

    async fn accept_name(&self, event: &InboundText, draft_id: RowId, text: &str) {
        let name = text.trim();
        if name.is_empty() {
            self.reply(event.chat_id, View::name_empty(), false).await;
            return;
        }

        match self.storage.list_entries(event.owner_id).await {
            Ok(entries) if entries.iter().any(|e| e.name == name) => {
                self.reply(event.chat_id, &View::name_taken(name), false)
                    .await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to list TOTPs: {e}");
                self.reply(event.chat_id, &View::failed("save the name", &e), false)
                    .await;
                return;
            }
        }

        match self.dialogs.accept_name(event.owner_id, draft_id, name).await {
            Ok(()) => {
                self.reply(event.chat_id, &View::input_secret(name), false)
                    .await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to save draft name: {e}");
                self.reply(event.chat_id, &View::failed("save the name", &e), false)
                    .await;
            }
        }
    }

    async fn accept_secret(&self, event: &InboundText, draft_id: RowId, name: &str, text: &str) {
        // The message carries the secret; remove it whatever happens next
        self.delete_quietly(event.chat_id, event.message_id).await;

        let secret = normalize_secret(text);
        if let Err(e) = self.codes.compute_code(&secret, self.clock.now()) {
            debug!(owner_id = event.owner_id, "Rejected secret: {e}");
            self.reply(event.chat_id, &View::invalid_secret(name), false)
                .await;
            return;
        }

        match self
            .dialogs
            .accept_secret(event.owner_id, draft_id, name, &secret)
            .await
        {
            Ok(entry_id) => {
                info!(owner_id = event.owner_id, entry_id = entry_id, "TOTP created");
                self.reply(event.chat_id, &View::created(name), true).await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to save TOTP: {e}");
                let action = format!("save TOTP `{name}`");
                self.reply(event.chat_id, &View::failed(&action, &e), false)
                    .await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Button presses
    // ─────────────────────────────────────────────────────────────────────────

    async fn delete_entry(&self, event: &InboundCallback, entry_id: RowId, handle: HandleId) {
        if let Err(e) = self.storage.delete_entry(event.owner_id, entry_id).await {
            error!(owner_id = event.owner_id, entry_id = entry_id, "Failed to delete TOTP: {e}");
            self.reply(event.chat_id, &View::failed("delete your TOTP", &e), false)
                .await;
            return;
        }
        info!(owner_id = event.owner_id, entry_id = entry_id, "TOTP deleted");

        self.finish_selection(event, handle, View::deleted()).await;
    }

    async fn generate_code(&self, event: &InboundCallback, entry_id: RowId, handle: HandleId) {
        let entry = match self.storage.get_entry(event.owner_id, entry_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(owner_id = event.owner_id, entry_id = entry_id, "Failed to load TOTP: {e}");
                self.reply(event.chat_id, &View::failed("generate OTP", &e), false)
                    .await;
                return;
            }
        };

        let now = self.clock.now();
        let code = match self.codes.compute_code(&entry.secret, now) {
            Ok(code) => code,
            Err(e) => {
                warn!(owner_id = event.owner_id, entry_id = entry_id, "Failed to generate OTP: {e}");
                self.reply(event.chat_id, &View::failed("generate OTP", &e), false)
                    .await;
                return;
            }
        };

        let text = View::generated(&entry.name, &code, seconds_remaining(now));
        self.finish_selection(event, handle, &text).await;
    }

    /// Consume the selection handle and replace the selection message with `text`.
    async fn finish_selection(&self, event: &InboundCallback, handle: HandleId, text: &str) {
        match self.registry.resolve_and_consume(event.owner_id, handle).await {
            Ok(message_id) => {
                if let Err(e) = self
                    .messenger
                    .edit_message_text(event.chat_id, message_id, text)
                    .await
                {
                    warn!(chat_id = event.chat_id, "Failed to edit selection message: {e}");
                }
            }
            Err(StorageError::NotFound(what)) => {
                debug!(owner_id = event.owner_id, "Stale selection: {what}");
                self.reply(event.chat_id, View::selection_expired(), false)
                    .await;
            }
            Err(e) => {
                error!(owner_id = event.owner_id, "Failed to resolve handle {handle}: {e}");
                self.reply(event.chat_id, &View::failed("update the selection", &e), false)
                    .await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport helpers: failures are logged, never surfaced
    // ─────────────────────────────────────────────────────────────────────────

    async fn reply(&self, chat_id: ChatId, text: &str, with_quick_replies: bool) {
        if let Err(e) = self
            .messenger
            .send_text(chat_id, text, with_quick_replies)
            .await
        {
            warn!(chat_id = chat_id, "Failed to send message: {e}");
        }
    }

    async fn typing(&self, chat_id: ChatId) {
        if let Err(e) = self.messenger.show_typing(chat_id).await {
            debug!(chat_id = chat_id, "Failed to show typing indicator: {e}");
        }
    }

    async fn delete_quietly(&self, chat_id: ChatId, message_id: MessageId) {
        if let Err(e) = self.messenger.delete_message(chat_id, message_id).await {
            warn!(chat_id = chat_id, "Failed to delete user's message with secret: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::MockMessenger;
    use crate::storage::{MockStorageProvider, PendingDraft, SqliteStorage};
    use crate::totp::MockCodeGenerator;
    use mockall::predicate::{always, eq};

    fn quiet_messenger() -> MockMessenger {
        let mut messenger = MockMessenger::new();
        messenger.expect_show_typing().returning(|_| Ok(()));
        messenger
    }

    fn text(text: &str) -> InboundText {
        InboundText {
            owner_id: 1,
            chat_id: 10,
            message_id: 100,
            text: Some(text.to_string()),
        }
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_dialog_and_reports() {
        let mut storage = MockStorageProvider::new();
        storage.expect_get_draft().returning(|_| {
            Ok(Some(PendingDraft {
                id: 3,
                owner_id: 1,
                name: Some("Mail".to_string()),
                updated_at: chrono::Utc::now().timestamp(),
            }))
        });
        storage
            .expect_create_entry()
            .returning(|_, _, _| Err(StorageError::NotFound("table".into())));
        storage.expect_delete_draft().never();

        let mut messenger = quiet_messenger();
        messenger
            .expect_delete_message()
            .with(eq(10), eq(100))
            .times(1)
            .returning(|_, _| Ok(()));
        messenger
            .expect_send_text()
            .withf(|_, text, _| text.starts_with("Failed to save TOTP `Mail`"))
            .times(1)
            .returning(|_, _, _| Ok(101));

        let engine = DispatchEngine::new(
            Arc::new(storage),
            Arc::new(messenger),
            &CoreSettings::default(),
        );
        engine.handle_text(text("JBSWY3DPEHPK3PXP")).await;
    }

    #[tokio::test]
    async fn test_invalid_secret_is_rejected_before_persisting() {
        let storage = Arc::new(SqliteStorage::open_in_memory().await.expect("db"));
        let draft_id = storage.create_draft(1).await.expect("draft");
        storage
            .set_draft_name(1, draft_id, "Mail")
            .await
            .expect("name");

        let mut codes = MockCodeGenerator::new();
        codes
            .expect_compute_code()
            .returning(|_, _| Err(crate::totp::TotpError::InvalidSecret("nope")));

        let mut messenger = quiet_messenger();
        messenger.expect_delete_message().returning(|_, _| Ok(()));
        messenger
            .expect_send_text()
            .withf(|_, text, _| text.starts_with("That is not a valid base32 secret"))
            .times(1)
            .returning(|_, _, _| Ok(101));

        let engine = DispatchEngine::with_parts(
            storage.clone(),
            Arc::new(messenger),
            Arc::new(codes),
            Arc::new(SystemClock),
            &CoreSettings::default(),
        );
        engine.handle_text(text("???")).await;

        assert!(storage.list_entries(1).await.expect("list").is_empty());
        assert!(storage.get_draft(1).await.expect("draft").is_some());
    }

    #[tokio::test]
    async fn test_send_failure_releases_handle() {
        let storage = Arc::new(SqliteStorage::open_in_memory().await.expect("db"));
        storage.create_entry(1, "Mail", "AAAA").await.expect("entry");

        let mut messenger = quiet_messenger();
        messenger
            .expect_send_with_inline_buttons()
            .with(eq(10), always(), always())
            .times(1)
            .returning(|_, _, _| Err(crate::messenger::TransportError("down".into())));

        let engine = DispatchEngine::new(
            storage.clone(),
            Arc::new(messenger),
            &CoreSettings::default(),
        );
        engine.handle_text(text("/otp")).await;

        // The reserved handle (id 1) was released again
        assert!(storage
            .get_handle(1)
            .await
            .is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_command_for_other_bot_is_ignored() {
        let mut messenger = MockMessenger::new();
        messenger.expect_send_text().never();
        messenger.expect_send_with_inline_buttons().never();
        messenger.expect_show_typing().never();

        let engine = DispatchEngine::new(
            Arc::new(MockStorageProvider::new()),
            Arc::new(messenger),
            &CoreSettings::default(),
        )
        .with_bot_username("totp_bot");
        engine.handle_text(text("/otp@other_bot")).await;
    }

    #[tokio::test]
    async fn test_command_for_this_bot_is_handled() {
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_text()
            .withf(|_, text, _| text.starts_with("Input name"))
            .times(1)
            .returning(|_, _, _| Ok(101));

        let mut storage = MockStorageProvider::new();
        storage.expect_create_draft().times(1).returning(|_| Ok(1));

        let engine = DispatchEngine::new(
            Arc::new(storage),
            Arc::new(messenger),
            &CoreSettings::default(),
        )
        .with_bot_username("totp_bot");
        engine.handle_text(text("/new@totp_bot")).await;
    }

    #[tokio::test]
    async fn test_message_without_text() {
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_text()
            .with(eq(10), eq("Invalid message type"), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(101));

        let engine = DispatchEngine::new(
            Arc::new(MockStorageProvider::new()),
            Arc::new(messenger),
            &CoreSettings::default(),
        );
        engine
            .handle_text(InboundText {
                text: None,
                ..text("")
            })
            .await;
    }
}
