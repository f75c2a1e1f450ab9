//! Update handlers.
//!
//! Translate teloxide updates into dispatch-engine events. All conversation
//! logic lives in the engine.

use crate::bot::DenialThrottle;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use totp_bot_core::engine::{DispatchEngine, InboundCallback, InboundText};
use tracing::{debug, info, warn};

/// Safely extracts user ID from a message, returning 0 if sender is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn get_user_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |u| u.first_name.clone())
}

/// Build the engine event for an inbound message.
#[must_use]
pub fn inbound_text(msg: &Message) -> InboundText {
    InboundText {
        owner_id: get_user_id_safe(msg),
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        text: msg.text().map(str::to_string),
    }
}

/// Handle a message from an allowed user.
///
/// # Errors
///
/// Never fails; the signature matches the other handlers.
pub async fn handle_message(msg: Message, engine: Arc<DispatchEngine>) -> Result<()> {
    debug!(
        user_id = get_user_id_safe(&msg),
        "Message from {}",
        get_user_name(&msg)
    );
    engine.handle_text(inbound_text(&msg)).await;
    Ok(())
}

/// Handle an inline button press from an allowed user.
///
/// The query is answered first so the client stops its spinner.
///
/// # Errors
///
/// Returns an error if the pressed message carries no chat.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, engine: Arc<DispatchEngine>) -> Result<()> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    let chat_id = q
        .message
        .as_ref()
        .map(|msg| msg.chat().id)
        .ok_or_else(|| anyhow::anyhow!("Callback message missing chat id"))?;

    engine
        .handle_callback(InboundCallback {
            owner_id: q.from.id.0.cast_signed(),
            chat_id: chat_id.0,
            data: q.data.clone(),
        })
        .await;
    Ok(())
}

/// Dismiss a button press from a user outside the allowlist.
///
/// Only the query is answered, so the client spinner stops; nothing else is
/// sent.
///
/// # Errors
///
/// Returns an error if the query cannot be answered.
pub async fn handle_unauthorized_callback(bot: Bot, q: CallbackQuery) -> Result<()> {
    debug!(user_id = q.from.id.0, "Dropping callback query from unauthorized user");
    bot.answer_callback_query(q.id).await?;
    Ok(())
}

/// Tell a user outside the allowlist that access is denied, once per cooldown.
///
/// # Errors
///
/// Returns an error if the denial cannot be sent.
pub async fn handle_unauthorized(bot: Bot, msg: Message, throttle: Arc<DenialThrottle>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    if !throttle.should_notify(user_id) {
        return Ok(());
    }

    info!(
        "⛔️ Unauthorized access from user {} ({}). Sending denial message.",
        user_id,
        get_user_name(&msg)
    );
    bot.send_message(msg.chat.id, "⛔️ Access denied").await?;
    throttle.record_notified(user_id).await;
    Ok(())
}
