//! Feature-module registry.
//!
//! Independent features implement [`Plugin`] and contribute a branch to the
//! dispatch tree; the registry assembles the tree and logs each loaded
//! plugin. The restricted-content saver is one such plugin.

pub mod saver;

use crate::bot::DenialCooldown;
use crate::pipeline::AppContext;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info};

/// One runnable feature module.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// The dptree branch handling this plugin's updates.
    fn handler(&self) -> UpdateHandler<teloxide::RequestError>;
}

/// All compiled-in plugins.
#[must_use]
pub fn discover() -> Vec<Box<dyn Plugin>> {
    vec![Box::new(saver::SaverPlugin)]
}

/// Assembles the dispatch tree from the plugin branches, then the
/// unauthorized fallback.
#[must_use]
pub fn build_handler(plugins: &[Box<dyn Plugin>]) -> UpdateHandler<teloxide::RequestError> {
    let mut root = dptree::entry();
    for plugin in plugins {
        info!(plugin = plugin.name(), "loading plugin");
        root = root.branch(plugin.handler());
    }
    root.branch(
        Update::filter_message()
            .filter(|msg: Message, ctx: Arc<AppContext>| !saver::is_allowed(&ctx, &msg))
            .endpoint(handle_unauthorized),
    )
}

async fn handle_unauthorized(
    bot: Bot,
    msg: Message,
    cooldown: Arc<DenialCooldown>,
) -> ResponseResult<()> {
    let user_id = saver::user_id_of(&msg);

    if cooldown.should_notify(user_id).await {
        info!(user_id, "unauthorized access, sending denial message");
        if let Err(e) = bot.send_message(msg.chat.id, "⛔️ Access denied").await {
            error!(user_id, error = %e, "failed to send denial message");
        } else {
            cooldown.mark_notified(user_id).await;
        }
    }

    respond(())
}
