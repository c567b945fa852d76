use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use common::{MonitorCommand, MonitorState, MonitorStatus};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub command_tx: mpsc::Sender<MonitorCommand>,
    pub status: Arc<RwLock<MonitorStatus>>,
    /// Chats that receive alerts; the only users allowed to issue commands.
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "StreakWatch commands:")]
pub enum Command {
    #[command(description = "Show monitor status")]
    Status,
    #[command(description = "Pause candle checks")]
    Pause,
    #[command(description = "Resume candle checks")]
    Resume,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Pause].endpoint(handle_pause))
        .branch(case![Command::Resume].endpoint(handle_resume));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let status = deps.status.read().await.clone();
    bot.send_message(msg.chat.id, status_text(&status)).await?;
    Ok(())
}

async fn handle_pause(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.status.read().await.state;
    if state == MonitorState::Paused {
        bot.send_message(msg.chat.id, "Monitor is already paused.").await?;
    } else {
        let _ = deps.command_tx.send(MonitorCommand::Pause).await;
        bot.send_message(msg.chat.id, "Monitor paused. No alerts until /resume.").await?;
    }
    Ok(())
}

async fn handle_resume(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.status.read().await.state;
    if state != MonitorState::Paused {
        bot.send_message(msg.chat.id, "Monitor is not paused.").await?;
    } else {
        let _ = deps.command_tx.send(MonitorCommand::Resume).await;
        bot.send_message(msg.chat.id, "Monitor resumed.").await?;
    }
    Ok(())
}

pub fn status_text(status: &MonitorStatus) -> String {
    let last_cycle = status
        .last_cycle_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let backoff = match status.backoff_minutes {
        0 => "none".to_string(),
        m => format!("{m} min"),
    };
    format!(
        "StreakWatch Status\n\
         Monitor: {}\n\
         Last check: {last_cycle}\n\
         Rate-limit backoff: {backoff}\n\
         Tracked alerts: {}\n\
         Alerts sent: {}",
        status.state, status.tracked_alerts, status.alerts_sent
    )
}
