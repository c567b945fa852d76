use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::warn;

use common::{DeliveryError, Notifier};

/// Delivers alert text to every configured chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_ids: &[i64]) -> Self {
        Self {
            bot,
            chat_ids: chat_ids.iter().copied().map(ChatId).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// Sends to each chat in turn. One unreachable chat does not stop the
    /// others; the error reports every chat that failed.
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        let mut failed = Vec::new();
        for &chat_id in &self.chat_ids {
            if let Err(e) = self.bot.send_message(chat_id, text).await {
                warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
                failed.push(format!("{}: {e}", chat_id.0));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError(failed.join("; ")))
        }
    }
}
