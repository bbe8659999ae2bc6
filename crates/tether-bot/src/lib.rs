use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tether_core::approval::ApprovalCoordinator;
use tether_core::config::{Config, paths};
use tether_core::session::SessionStore;
use tether_core::turn::TurnEngine;
use tracing::{error, info, warn};

use crate::bot::BotContext;
use crate::telegram::{TelegramClient, TelegramSettings};

mod bot;
mod commands;
mod handlers;
mod media;
mod telegram;

pub async fn run() -> Result<()> {
    let config = Config::load().context("Failed to load tether config")?;
    let settings = TelegramSettings::from_config(&config)?;
    let config_path = paths::config_path();
    if config_path.exists() {
        info!(path = %config_path.display(), "loaded config file");
    }
    info!(
        backend = ?config.backend,
        permission_mode = ?config.permission_mode,
        "starting tether-bot"
    );
    run_bot(config, settings).await
}

async fn run_bot(config: Config, settings: TelegramSettings) -> Result<()> {
    let client = TelegramClient::new(settings.bot_token);

    let sessions = Arc::new(SessionStore::new(
        config.max_history_turns,
        config.session_root(),
    ));
    let approvals = Arc::new(ApprovalCoordinator::new());
    let engine = TurnEngine::new(&config, Arc::clone(&sessions), Arc::clone(&approvals))?;
    let context = Arc::new(BotContext::new(client.clone(), config, engine));

    if let Err(err) = client.set_my_commands(&commands::command_menu()).await {
        warn!(%err, "failed to publish command menu");
    }

    let mut offset: Option<i64> = None;
    let poll_timeout = Duration::from_secs(30);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("tether-bot started. Polling for updates...");

    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            updates = client.get_updates(current_offset, poll_timeout) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        error!(%err, "Telegram polling error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some(callback) = update.callback_query {
                        handlers::approval::handle_callback(&context, callback).await;
                        continue;
                    }
                    if let Some(message) = update.message {
                        let context = Arc::clone(&context);
                        // Each message runs on its own task; ordering within a
                        // conversation is enforced by the turn engine.
                        tokio::spawn(async move {
                            if let Err(err) =
                                handlers::message::handle_message(&context, message).await
                            {
                                error!(%err, "message handling error");
                            }
                        });
                    }
                }
            }
        }
    }

    Ok(())
}
