//! Incoming messages: commands, photos, and prompts for the agent.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tether_core::text::split_message;
use tether_core::turn::{TurnOutcome, update_channel};
use tracing::{info, warn};

use crate::bot::BotContext;
use crate::commands::{BotCommand, parse_command};
use crate::handlers::approval::spawn_approval_renderer;
use crate::media::{extract_image_paths, send_image_from_path, send_media_artifacts};
use crate::telegram::{Message, PhotoSize};

const WELCOME_MESSAGE: &str = "👋 Welcome! I'm your coding agent assistant.\n\n\
Send me any task and I'll help you with:\n\
• Code generation and debugging\n\
• File operations\n\
• Terminal commands\n\
• Project analysis\n\
• Automatic image sending from the machine I run on\n\n\
Commands:\n\
/start - Start/restart conversation\n\
/clear - Clear conversation history\n\
/help - Show help message\n\n\
💡 Tip: I can automatically send images when I mention file paths!";

const HELP_MESSAGE: &str = "📚 How to use this bot:\n\n\
Simply send me a message with your task, for example:\n\
• \"Create a Python script to sort a list\"\n\
• \"Explain how async/await works\"\n\
• \"Send me the image at ~/Pictures/photo.png\"\n\n\
Commands:\n\
/start - Start/restart conversation\n\
/clear - Clear conversation history\n\
/help - Show this help message\n\n\
Image features:\n\
🖼️ I automatically detect and send images that I mention in my responses!\n\n\
When I need to use a privileged tool you'll get an approval prompt with\n\
✅ Approve / ❌ Deny buttons. Nothing runs until you decide.";

const NO_RESPONSE_TEXT: &str = "⚠️ No text response received.";
const TIMEOUT_TEXT: &str = "❌ Timeout: the agent took too long to respond. Please try again.";

pub(crate) async fn handle_message(context: &Arc<BotContext>, message: Message) -> Result<()> {
    if !message.chat.is_private() {
        info!(chat_id = message.chat.id, "ignoring non-DM chat");
        return Ok(());
    }

    let chat_id = message.chat.id;
    let message_id = message.message_id;

    let Some(user) = message.from.as_ref() else {
        info!(chat_id, "ignoring message without sender");
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let key = conversation_key(chat_id);

    if message.photo.is_none()
        && let Some(text) = message.text.as_deref()
        && let Some(command) = parse_command(text)
    {
        return handle_command(context, chat_id, message_id, &key, command).await;
    }

    let Some(prompt) = build_prompt(context, &message, &key).await? else {
        context
            .client()
            .send_message(
                chat_id,
                "❌ Please send a text message or an image.",
                Some(message_id),
                None,
            )
            .await?;
        return Ok(());
    };

    info!(chat_id, user_id = user.id, "accepted message");
    run_turn_and_reply(context, chat_id, message_id, &key, &prompt).await
}

async fn handle_command(
    context: &Arc<BotContext>,
    chat_id: i64,
    message_id: i64,
    key: &str,
    command: BotCommand,
) -> Result<()> {
    let reply = match command {
        BotCommand::Start => WELCOME_MESSAGE,
        BotCommand::Help => HELP_MESSAGE,
        BotCommand::Clear => {
            context.sessions().clear(key).await;
            "🗑️ Conversation history cleared."
        }
    };
    context
        .client()
        .send_message(chat_id, reply, Some(message_id), None)
        .await?;
    Ok(())
}

/// Builds the agent prompt from the message text and any attached photo.
/// Photos are saved into the conversation's working directory and handed
/// to the agent by path.
async fn build_prompt(
    context: &Arc<BotContext>,
    message: &Message,
    key: &str,
) -> Result<Option<String>> {
    let text = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty());

    let Some(photos) = message.photo.as_deref() else {
        return Ok(text.map(str::to_string));
    };
    let Some(photo) = select_best_photo(photos) else {
        return Ok(text.map(str::to_string));
    };

    let file = context.client().get_file(&photo.file_id).await?;
    let file_path = file
        .file_path
        .ok_or_else(|| anyhow!("Telegram file missing file_path"))?;
    let bytes = context.client().download_file(&file_path).await?;

    let dir = context.sessions().isolation_dir(key);
    let local_path = dir.join(format!("telegram_image_{}.jpg", message.message_id));
    std::fs::write(&local_path, &bytes)
        .map_err(|err| anyhow!("Failed to save incoming photo: {err}"))?;

    let caption = text.unwrap_or("What's in this image?");
    Ok(Some(format!(
        "{caption}\n\n\
         User has sent an image saved at: {}\n\
         Please analyze this image and respond to the user's request.",
        local_path.display()
    )))
}

fn select_best_photo(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    photos.iter().max_by_key(|photo| {
        let size = photo.file_size.unwrap_or(0);
        let area = (photo.width.max(0) as u64) * (photo.height.max(0) as u64);
        (size, area)
    })
}

async fn run_turn_and_reply(
    context: &Arc<BotContext>,
    chat_id: i64,
    message_id: i64,
    key: &str,
    prompt: &str,
) -> Result<()> {
    let typing = context.client().start_typing(chat_id);
    let (updates_tx, updates_rx) = update_channel();
    let renderer = spawn_approval_renderer(Arc::clone(context), chat_id, message_id, updates_rx);

    let outcome = context.engine().run_turn(key, prompt, &updates_tx).await;

    // Closing the channel ends the renderer once it has drained.
    drop(updates_tx);
    let _ = renderer.await;
    drop(typing);

    match outcome {
        TurnOutcome::Completed { text, media } => {
            send_media_artifacts(context.client(), chat_id, &media).await;
            for path in extract_image_paths(&text) {
                send_image_from_path(context.client(), chat_id, &path).await;
            }
            if text.is_empty() {
                if media.is_empty() {
                    context
                        .client()
                        .send_message(chat_id, NO_RESPONSE_TEXT, Some(message_id), None)
                        .await?;
                }
            } else {
                send_text_chunks(context, chat_id, message_id, &text).await?;
            }
        }
        TurnOutcome::DeniedAborted { text } => {
            if text.is_empty() {
                context
                    .client()
                    .send_message(chat_id, NO_RESPONSE_TEXT, Some(message_id), None)
                    .await?;
            } else {
                send_text_chunks(context, chat_id, message_id, &text).await?;
            }
        }
        TurnOutcome::TimedOut => {
            context
                .client()
                .send_message(chat_id, TIMEOUT_TEXT, Some(message_id), None)
                .await?;
        }
        TurnOutcome::Failed { message } => {
            warn!(chat_id, %message, "turn failed");
            context
                .client()
                .send_message(
                    chat_id,
                    &format!("❌ An error occurred while processing your request.\n{message}"),
                    Some(message_id),
                    None,
                )
                .await?;
        }
    }

    Ok(())
}

async fn send_text_chunks(
    context: &Arc<BotContext>,
    chat_id: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    let chunks = split_message(text, context.config().max_message_length);
    for chunk in chunks {
        context
            .client()
            .send_message(chat_id, &chunk, Some(message_id), None)
            .await?;
    }
    Ok(())
}

fn conversation_key(chat_id: i64) -> String {
    format!("telegram-{chat_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_keys_are_per_chat() {
        assert_eq!(conversation_key(42), "telegram-42");
        assert_ne!(conversation_key(1), conversation_key(2));
    }

    #[test]
    fn best_photo_prefers_size_then_area() {
        let photos = vec![
            PhotoSize {
                file_id: "small".to_string(),
                width: 90,
                height: 90,
                file_size: Some(1_000),
            },
            PhotoSize {
                file_id: "large".to_string(),
                width: 1280,
                height: 960,
                file_size: Some(200_000),
            },
        ];
        assert_eq!(select_best_photo(&photos).unwrap().file_id, "large");
        assert!(select_best_photo(&[]).is_none());
    }
}
