use std::sync::Arc;

use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, MonitorCommand, SystemClock, WatchConfig};
use engine::{binance::BASE_URL, BinanceClient, Monitor};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let watch = WatchConfig::load(&cfg.watch_config_path);
    info!(
        config = %cfg.watch_config_path,
        instruments = watch.instruments.len(),
        timeframes = watch.timeframes.len(),
        chats = cfg.telegram_chat_ids.len(),
        "StreakWatch starting"
    );

    // ── Market data ───────────────────────────────────────────────────────────
    let base_url = cfg.binance_base_url.as_deref().unwrap_or(BASE_URL);
    let market = BinanceClient::new(base_url, watch.fetch_timeout())
        .unwrap_or_else(|e| panic!("Failed to build Binance client: {e}"));

    // ── Telegram ──────────────────────────────────────────────────────────────
    let bot = Bot::new(cfg.telegram_token.clone());
    let notifier = TelegramNotifier::new(bot.clone(), &cfg.telegram_chat_ids);

    // ── Monitor ───────────────────────────────────────────────────────────────
    let (monitor, handle) = Monitor::new(
        watch,
        Arc::new(market),
        Arc::new(notifier),
        Arc::new(SystemClock),
    );

    let bot_deps = BotDeps {
        command_tx: handle.command_sender(),
        status: handle.status_handle(),
        allowed_user_ids: Arc::new(cfg.telegram_chat_ids.clone()),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let monitor_task = tokio::spawn(monitor.run());
    let bot_task = tokio::spawn(start_bot(bot, bot_deps));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Finishing current check.");

    handle.send(MonitorCommand::Shutdown).await;
    if let Err(e) = monitor_task.await {
        error!(error = %e, "Monitor task ended abnormally");
    }
    bot_task.abort();
    info!("StreakWatch stopped.");
}
