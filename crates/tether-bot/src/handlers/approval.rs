//! Approval prompts and their button callbacks.
//!
//! While a turn runs, a renderer task turns `TurnUpdate`s into Telegram
//! messages with Approve/Deny buttons. Button presses come back as
//! callback queries and are delivered to the coordinator, which unblocks
//! the waiting turn.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tether_core::text::truncate_for_display;
use tether_core::turn::{TurnUpdate, TurnUpdateRx};
use tracing::{info, warn};

use crate::bot::BotContext;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup};

const EXPIRED_PROMPT_TEXT: &str = "⌛ Permission request timed out. The action was not executed.";
const UNKNOWN_REQUEST_TEXT: &str = "⚠️ Permission request expired or not found.";

fn render_prompt(tool_name: &str, tool_input: &Value, display_cap: usize) -> String {
    let input = serde_json::to_string_pretty(tool_input).unwrap_or_else(|_| tool_input.to_string());
    let display_input = truncate_for_display(&input, display_cap);
    format!(
        "🔐 Permission Required\n\n\
         Tool: {tool_name}\n\n\
         Parameters:\n{display_input}\n\n\
         Do you want to allow this action?"
    )
}

fn approval_keyboard(request_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![
            InlineKeyboardButton {
                text: "✅ Approve".to_string(),
                callback_data: format!("approve_{request_id}"),
            },
            InlineKeyboardButton {
                text: "❌ Deny".to_string(),
                callback_data: format!("deny_{request_id}"),
            },
        ]],
    }
}

/// Renders turn updates for one conversation until the update channel
/// closes (the turn is over).
pub(crate) fn spawn_approval_renderer(
    context: Arc<BotContext>,
    chat_id: i64,
    reply_to_message_id: i64,
    mut updates: TurnUpdateRx,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // By the time an expiry surfaces here the coordinator has already
        // reclaimed the request, so the renderer keeps its own id → message
        // map for that edit.
        let mut prompts: HashMap<String, i64> = HashMap::new();
        while let Some(update) = updates.recv().await {
            match update {
                TurnUpdate::ApprovalRequested {
                    id,
                    tool_name,
                    tool_input,
                } => {
                    let text = render_prompt(
                        &tool_name,
                        &tool_input,
                        context.config().max_tool_input_display,
                    );
                    let markup = approval_keyboard(&id);
                    match context
                        .client()
                        .send_message(chat_id, &text, Some(reply_to_message_id), Some(markup))
                        .await
                    {
                        Ok(message_id) => {
                            context.approvals().set_prompt_message_id(&id, message_id).await;
                            prompts.insert(id, message_id);
                        }
                        Err(err) => {
                            warn!(chat_id, %err, "failed to send approval prompt");
                        }
                    }
                }
                // The callback handler already rewrote the prompt.
                TurnUpdate::ApprovalResolved { id, .. } => {
                    prompts.remove(&id);
                }
                TurnUpdate::ApprovalExpired { id } => {
                    if let Some(message_id) = prompts.remove(&id) {
                        if let Err(err) = context
                            .client()
                            .edit_message_text(chat_id, message_id, EXPIRED_PROMPT_TEXT)
                            .await
                        {
                            warn!(chat_id, %err, "failed to mark prompt expired");
                        }
                    }
                }
            }
        }
    })
}

/// Handles an inline-button press on an approval prompt.
pub(crate) async fn handle_callback(context: &BotContext, callback: CallbackQuery) {
    // Acknowledge first so the client stops its spinner even on bad data.
    if let Err(err) = context.client().answer_callback_query(&callback.id).await {
        warn!(%err, "failed to answer callback query");
    }

    let Some(data) = callback.data.as_deref() else {
        return;
    };
    let Some(message) = callback.message.as_ref() else {
        return;
    };
    let chat_id = message.chat.id;
    let message_id = message.message_id;

    let (request_id, approved) = if let Some(id) = data.strip_prefix("approve_") {
        (id, true)
    } else if let Some(id) = data.strip_prefix("deny_") {
        (id, false)
    } else {
        warn!(data = %data, "unrecognized callback payload");
        return;
    };

    let Some(request) = context.approvals().lookup(request_id).await else {
        let _ = context
            .client()
            .edit_message_text(chat_id, message_id, UNKNOWN_REQUEST_TEXT)
            .await;
        return;
    };
    // Prefer the message id recorded when the prompt was rendered; the
    // callback's embedded message is a fallback (Telegram omits it for
    // sufficiently old prompts).
    let prompt_message_id = edit_target(&request, message_id);

    if context.approvals().resolve(request_id, approved).await {
        info!(request_id, approved, tool = %request.tool_name, "approval decision delivered");
        let text = if approved {
            format!(
                "✅ Approved\n\nTool: {}\n\nExecuting...",
                request.tool_name
            )
        } else {
            format!(
                "❌ Denied\n\nTool: {}\n\nAction cancelled.",
                request.tool_name
            )
        };
        if let Err(err) = context
            .client()
            .edit_message_text(chat_id, prompt_message_id, &text)
            .await
        {
            warn!(chat_id, %err, "failed to edit approval prompt");
        }
    }
    // A second press on an already-resolved prompt keeps the first edit.
}

fn edit_target(request: &tether_core::approval::ApprovalRequest, fallback_message_id: i64) -> i64 {
    request.prompt_message_id.unwrap_or(fallback_message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_shows_tool_and_parameters() {
        let text = render_prompt("Bash", &json!({"command": "ls -la"}), 400);
        assert!(text.starts_with("🔐 Permission Required"));
        assert!(text.contains("Tool: Bash"));
        assert!(text.contains("ls -la"));
        assert!(text.ends_with("Do you want to allow this action?"));
    }

    #[test]
    fn prompt_truncates_large_input() {
        let input = json!({"content": "x".repeat(2000)});
        let text = render_prompt("Write", &input, 400);
        assert!(text.contains("..."));
        // Cap plus the surrounding prompt text, nowhere near the raw input.
        assert!(text.chars().count() < 600);
    }

    #[tokio::test]
    async fn callback_edits_target_the_recorded_prompt_message() {
        let coordinator = tether_core::approval::ApprovalCoordinator::new();
        let id = coordinator.create("Bash", json!({"command": "ls"})).await;

        // Before the renderer reports back, the callback's own message is
        // the only handle we have.
        let request = coordinator.lookup(&id).await.unwrap();
        assert_eq!(edit_target(&request, 12), 12);

        coordinator.set_prompt_message_id(&id, 77).await;
        let request = coordinator.lookup(&id).await.unwrap();
        assert_eq!(edit_target(&request, 12), 77);
    }

    #[test]
    fn keyboard_encodes_the_request_id() {
        let markup = approval_keyboard("abc-123");
        assert_eq!(markup.inline_keyboard.len(), 1);
        let row = &markup.inline_keyboard[0];
        assert_eq!(row[0].callback_data, "approve_abc-123");
        assert_eq!(row[1].callback_data, "deny_abc-123");
        assert_eq!(row[0].text, "✅ Approve");
        assert_eq!(row[1].text, "❌ Deny");
    }
}
