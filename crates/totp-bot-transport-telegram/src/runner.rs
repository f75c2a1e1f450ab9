use crate::bot::handlers::{self, get_user_id_safe};
use crate::bot::{DenialThrottle, TelegramMessenger};
use crate::config::{get_unauthorized_cache_max_size, get_unauthorized_cooldown, BotSettings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, CallbackQuery};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use totp_bot_core::command::Command;
use totp_bot_core::engine::DispatchEngine;
use totp_bot_core::purge::purge_stale;
use totp_bot_core::storage::{SqliteStorage, StorageProvider};
use tracing::{error, info, warn};

/// Run the Telegram transport runtime.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let storage = init_storage(&settings).await;

    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let username = match bootstrap(&bot).await {
        Ok(username) => username,
        Err(e) => {
            error!("Failed to initialize bot: {e}");
            std::process::exit(1);
        }
    };

    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let engine = Arc::new(
        DispatchEngine::new(storage.clone(), messenger, settings.core.as_ref())
            .with_bot_username(username),
    );

    let shutdown = CancellationToken::new();
    let purge_task = spawn_purge_task(
        storage,
        settings.core.purge_interval_secs,
        settings.core.draft_ttl_secs,
        shutdown.clone(),
    );

    let throttle = init_denial_throttle();
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine, settings, throttle])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.cancel();
    if let Some(task) = purge_task {
        if let Err(e) = task.await {
            warn!("Purge task ended abnormally: {e}");
        }
    }
    info!("Bot stopped.");
}

async fn init_storage(settings: &BotSettings) -> Arc<SqliteStorage> {
    let path = Path::new(&settings.core.database_file_location);
    match SqliteStorage::open(path).await {
        Ok(s) => {
            info!("SQLite storage initialized at {}", path.display());
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to initialize SQLite storage: {}", e);
            std::process::exit(1);
        }
    }
}

/// Identify the bot, drop any webhook so long polling works, and publish the
/// command menu. Returns the bot's username.
async fn bootstrap(bot: &Bot) -> Result<String, teloxide::RequestError> {
    let me = bot.get_me().await?;
    let username = me.username().to_string();
    info!("Authorized as @{username}");

    bot.delete_webhook().await?;
    bot.set_my_commands(menu_commands()).await?;
    Ok(username)
}

fn menu_commands() -> Vec<BotCommand> {
    Command::MENU
        .iter()
        .map(|c| BotCommand::new(c.token().trim_start_matches('/'), c.description()))
        .collect()
}

fn init_denial_throttle() -> Arc<DenialThrottle> {
    let cooldown = get_unauthorized_cooldown();
    let max_size = get_unauthorized_cache_max_size();

    info!(
        "Initializing DenialThrottle (cooldown: {}s, max_size: {})",
        cooldown, max_size
    );

    Arc::new(DenialThrottle::new(cooldown, max_size))
}

/// Periodically purge stale drafts and handles until `shutdown` fires.
/// Returns `None` when the sweep is disabled.
fn spawn_purge_task(
    storage: Arc<dyn StorageProvider>,
    interval_secs: u64,
    draft_ttl_secs: u64,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("Background purge disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = purge_stale(storage.as_ref(), now, draft_ttl_secs).await {
                        error!("Purge failed: {e}");
                    }
                }
            }
        }
    }))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, settings: Arc<BotSettings>| {
                    settings.telegram.is_allowed(q.from.id.0.cast_signed())
                })
                .endpoint(handle_callback),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<BotSettings>| {
                    settings.telegram.is_allowed(get_user_id_safe(&msg))
                })
                .endpoint(handle_message),
        )
        // Everyone the filters above rejected
        .branch(Update::filter_callback_query().endpoint(handle_unauthorized_callback))
        .branch(Update::filter_message().endpoint(handle_unauthorized))
}

async fn handle_message(
    msg: Message,
    engine: Arc<DispatchEngine>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_message(msg, engine).await {
        error!("Message handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<DispatchEngine>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_callback(bot, q, engine).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

async fn handle_unauthorized_callback(
    bot: Bot,
    q: CallbackQuery,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_unauthorized_callback(bot, q).await {
        warn!("Failed to answer unauthorized callback query: {e}");
    }
    respond(())
}

async fn handle_unauthorized(
    bot: Bot,
    msg: Message,
    throttle: Arc<DenialThrottle>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_unauthorized(bot, msg, throttle).await {
        error!("Failed to send access denied message: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramSettings;
    use std::ops::ControlFlow;
    use totp_bot_core::config::CoreSettings;
    use totp_bot_core::storage::StorageError;

    const CALLBACK_FROM_42: &str = r#"{
        "update_id": 1,
        "callback_query": {
            "id": "4382",
            "from": {"id": 42, "is_bot": false, "first_name": "Eve"},
            "chat_instance": "-1",
            "data": "/otp 1,1"
        }
    }"#;

    /// Run `update` through the handler tree with an allowlist of
    /// `allowed_users`, against a bot whose API endpoint refuses connections.
    /// Returns whether some branch took the update.
    async fn is_handled(update: Update, allowed_users: &str) -> Result<bool, Box<dyn std::error::Error>> {
        let bot = Bot::new("1:unused").set_api_url("http://127.0.0.1:9/".parse()?);
        let storage = Arc::new(SqliteStorage::open_in_memory().await?);
        let engine = Arc::new(DispatchEngine::new(
            storage,
            Arc::new(TelegramMessenger::new(bot.clone())),
            &CoreSettings::default(),
        ));
        let settings = Arc::new(BotSettings::new(
            CoreSettings::default(),
            TelegramSettings {
                telegram_token: "1:unused".to_string(),
                allowed_users_str: Some(allowed_users.to_string()),
            },
        ));
        let throttle = Arc::new(DenialThrottle::new(60, 16));

        let outcome = setup_handler()
            .dispatch(dptree::deps![update, bot, engine, settings, throttle])
            .await;
        Ok(matches!(outcome, ControlFlow::Break(Ok(()))))
    }

    #[tokio::test]
    async fn test_unauthorized_callback_is_consumed() -> Result<(), Box<dyn std::error::Error>> {
        let update: Update = serde_json::from_str(CALLBACK_FROM_42)?;
        assert!(is_handled(update, "7").await?);
        Ok(())
    }

    #[test]
    fn test_menu_commands_have_bare_names() {
        let commands = menu_commands();
        assert_eq!(commands.len(), Command::MENU.len());
        assert_eq!(commands[0].command, "otp");
        assert!(commands.iter().all(|c| !c.description.is_empty()));
    }

    #[tokio::test]
    async fn test_disabled_purge_spawns_nothing() -> Result<(), StorageError> {
        let storage = Arc::new(SqliteStorage::open_in_memory().await?);
        assert!(spawn_purge_task(storage, 0, 600, CancellationToken::new()).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_task_stops_on_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let storage = Arc::new(SqliteStorage::open_in_memory().await?);
        let shutdown = CancellationToken::new();
        let task = spawn_purge_task(storage, 3600, 600, shutdown.clone())
            .ok_or("purge task not spawned")?;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await??;
        Ok(())
    }
}
