//! Restricted-content saver plugin.
//!
//! Command surface of the retrieval pipeline: `/save` (alias `/s`) with an
//! optional batch count, plus usage, history, and liveness commands.

use super::Plugin;
use crate::pipeline::{self, AppContext};
use serde_json::json;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::error;

const USAGE: &str = "📋 How to use:\n\
    /save https://t.me/c/channelid/messageid for private channels\n\
    /save https://t.me/channelname/messageid for public channels\n\
    /save https://t.me/b/botusername/messageid for bot messages\n\n\
    Append a count to save several consecutive messages:\n\
    /save https://t.me/channelname/100 5";

/// Bot commands served by this plugin.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "save content from a message link", alias = "s")]
    Save(String),
    #[command(description = "usage instructions")]
    Start,
    #[command(description = "your recent retrievals")]
    History,
    #[command(description = "liveness check")]
    Healthcheck,
}

pub struct SaverPlugin;

impl Plugin for SaverPlugin {
    fn name(&self) -> &'static str {
        "saver"
    }

    fn handler(&self) -> UpdateHandler<teloxide::RequestError> {
        Update::filter_message().branch(
            dptree::filter(|msg: Message, ctx: Arc<AppContext>| is_allowed(&ctx, &msg))
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
    }
}

/// Whether the sender may use the bot. An empty allow list means the bot
/// is open to everyone.
#[must_use]
pub fn is_allowed(ctx: &AppContext, msg: &Message) -> bool {
    let allowed = ctx.settings.allowed_users();
    allowed.is_empty() || allowed.contains(&user_id_of(msg))
}

/// Sender id, or 0 for channel posts without one.
#[must_use]
pub fn user_id_of(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<AppContext>,
) -> ResponseResult<()> {
    let result = match cmd {
        Command::Save(args) => handle_save(&bot, &msg, &ctx, &args).await,
        Command::Start => bot
            .send_message(msg.chat.id, USAGE)
            .await
            .map(drop)
            .map_err(anyhow::Error::from),
        Command::History => handle_history(&bot, &msg, &ctx).await,
        Command::Healthcheck => bot
            .send_message(msg.chat.id, "✅ Bot is alive and serving.")
            .await
            .map(drop)
            .map_err(anyhow::Error::from),
    };
    if let Err(e) = result {
        error!(error = %e, "command handler failed");
    }
    respond(())
}

async fn handle_save(
    bot: &Bot,
    msg: &Message,
    ctx: &Arc<AppContext>,
    args: &str,
) -> anyhow::Result<()> {
    let args = args.trim();
    if args.is_empty() {
        bot.send_message(msg.chat.id, USAGE).await?;
        return Ok(());
    }

    let mut parts = args.split_whitespace();
    let link = parts.next().unwrap_or_default().to_string();
    let count = parts
        .next()
        .and_then(|c| c.parse::<i32>().ok())
        .unwrap_or(1)
        .clamp(1, i32::try_from(ctx.settings.batch_limit).unwrap_or(1));

    let user_id = user_id_of(msg);
    for offset in 0..count {
        pipeline::run_retrieval(ctx, bot, msg.chat.id, user_id, &link, offset).await;
        if ctx.shutdown.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn handle_history(bot: &Bot, msg: &Message, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let user_id = user_id_of(msg);
    let entries = ctx
        .store
        .find_all("retrievals", &json!({ "user_id": user_id }))
        .await;

    if entries.is_empty() {
        bot.send_message(msg.chat.id, "No retrievals yet.").await?;
        return Ok(());
    }

    let lines: Vec<String> = entries
        .iter()
        .rev()
        .take(10)
        .map(|entry| {
            let icon = match entry["status"].as_str() {
                Some("delivered") => "✅",
                _ => "❌",
            };
            format!("{icon} {}", entry["link"].as_str().unwrap_or("<unknown>"))
        })
        .collect();

    bot.send_message(
        msg.chat.id,
        format!("Recent retrievals:\n{}", lines.join("\n")),
    )
    .await?;
    Ok(())
}
