use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;

use crate::observer::{FinishReason, RunObserver};
use crate::types::{StatsSnapshot, Tone};

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramBot {
    pub fn new(token: &str, chat_id: &str) -> Self {
        TelegramBot {
            client: reqwest::Client::new(),
            url: format!("{}/bot{}/sendMessage", BASE_URL, token),
            chat_id: chat_id.to_string(),
        }
    }

    /// `None` unless both TELEGRAM_TOKEN and TELEGRAM_CHAT_ID are set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").ok().filter(|t| !t.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|c| !c.is_empty())?;
        Some(Self::new(&token, &chat_id))
    }

    pub async fn send(&self, text: &str) {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let preview: String = text.chars().take(80).collect();
                log::info!("Telegram sent: {}", preview.replace('\n', " "));
            }
            Ok(resp) => {
                log::warn!("Telegram error status: {}", resp.status());
            }
            Err(e) => {
                log::warn!("Telegram send failed: {}", e);
            }
        }
    }

    // ── Convenience helpers ──────────────────────────────────────────────────

    pub async fn notify_start(&self, strategy: &str, assets: &[String], stake: f64) {
        self.send(&start_message(strategy, assets, stake)).await;
    }
}

pub fn start_message(strategy: &str, assets: &[String], stake: f64) -> String {
    format!(
        "🤖 <b>Robot started</b>\nStrategy: {strategy}\nAssets: {}\nStake: <code>{stake:.2}</code>",
        assets.join(", ")
    )
}

pub fn summary_message(stats: &StatsSnapshot, profit: f64, reason: &FinishReason) -> String {
    let emoji = if profit >= 0.0 { "📈" } else { "📉" };
    format!(
        "📊 <b>Session finished</b> ({reason})\n\
         {emoji} Result: <code>{profit:+.2}</code>\n\
         Ops: <code>{}</code>  Wins: <code>{}</code>  Losses: <code>{}</code>  WR: <code>{:.1}%</code>",
        stats.ops, stats.wins, stats.losses, stats.win_rate_percent,
    )
}

/// Run message worth pushing to the chat, with its prefix.
fn relay(message: &str, tone: Tone) -> Option<String> {
    let emoji = match tone {
        Tone::Win => "✅",
        Tone::Loss => "❌",
        Tone::Signal => "🎯",
        Tone::Error => "⚠️",
        Tone::Info | Tone::Notice | Tone::Warning => return None,
    };
    Some(format!("{emoji} {}", html_escape(message)))
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

enum Outbound {
    Text(String),
    Finished,
}

/// Pushes signals, results and the final summary to Telegram from a background task,
/// so the engine never waits on HTTP.
pub struct TelegramObserver {
    tx: mpsc::UnboundedSender<Outbound>,
    last_stats: std::sync::Mutex<(StatsSnapshot, f64)>,
}

impl TelegramObserver {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(bot: TelegramBot) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Outbound::Text(text) => bot.send(&text).await,
                    Outbound::Finished => break,
                }
            }
        });
        let empty = StatsSnapshot { ops: 0, wins: 0, losses: 0, win_rate_percent: 0.0 };
        (TelegramObserver { tx, last_stats: std::sync::Mutex::new((empty, 0.0)) }, handle)
    }

    fn push(&self, msg: Outbound) {
        if self.tx.send(msg).is_err() {
            log::debug!("Telegram worker gone, message dropped");
        }
    }

    fn latest(&self) -> std::sync::MutexGuard<'_, (StatsSnapshot, f64)> {
        self.last_stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RunObserver for TelegramObserver {
    fn on_log(&self, _at: DateTime<FixedOffset>, message: &str, tone: Tone) {
        if let Some(text) = relay(message, tone) {
            self.push(Outbound::Text(text));
        }
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        self.latest().0 = stats.clone();
    }

    fn on_profit(&self, profit: f64) {
        self.latest().1 = profit;
    }

    fn on_finished(&self, reason: &FinishReason) {
        let text = {
            let latest = self.latest();
            summary_message(&latest.0, latest.1, reason)
        };
        self.push(Outbound::Text(text));
        self.push(Outbound::Finished);
    }
}
