use std::path::PathBuf;
use std::sync::Arc;

use binary_bot::clock::{Clock, ReplayClock};
use binary_bot::config::RunConfig;
use binary_bot::engine::{Engine, RunSummary};
use binary_bot::gateway::MarketGateway;
use binary_bot::observer::{Fanout, LogObserver, RunObserver};
use binary_bot::paper::{PaperGateway, DEFAULT_PAYOUT};
use binary_bot::signal_feed::{SignalParseOptions, SignalParser};
use binary_bot::strategy::build_strategy;
use binary_bot::telegram::{TelegramBot, TelegramObserver};
use chrono::{DateTime, FixedOffset, TimeZone};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// MHI / Power Boss decision engine over recorded one-minute candles.
#[derive(Parser, Debug)]
#[command(name = "binary_bot", version)]
struct Cli {
    /// Run configuration (TOML)
    #[arg(long, default_value = "bot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Trade the configured strategy against the replayed market
    Replay(ReplayArgs),
    /// Trade signals parsed from a message file against the replayed market
    Signals {
        #[command(flatten)]
        replay: ReplayArgs,
        /// Messages separated by blank lines
        #[arg(long)]
        messages: PathBuf,
        /// Append -OTC to every parsed asset
        #[arg(long)]
        otc: bool,
    },
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Directory of <ASSET>.csv files
    #[arg(long, default_value = "data")]
    data: PathBuf,
    #[arg(long, default_value_t = DEFAULT_PAYOUT)]
    payout: f64,
    #[arg(long, default_value_t = 1000.0)]
    balance: f64,
    /// Replay start (RFC 3339); defaults to one hour after the first bar
    #[arg(long)]
    start: Option<String>,
}

const WARMUP_SECS: i64 = 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut cfg = RunConfig::load(&cli.config)?;
    log::info!("Config loaded from {}", cli.config.display());

    let replay = match &cli.mode {
        Mode::Replay(args) => args,
        Mode::Signals { replay, .. } => replay,
    };

    // ── Market ────────────────────────────────────────────────────────────────
    let placeholder = FixedOffset::east_opt(0).ok_or("invalid offset")?;
    let clock = Arc::new(ReplayClock::new(placeholder.timestamp_nanos(0)));
    let gateway = PaperGateway::new(clock.clone(), replay.balance, replay.payout, cfg.timing.candle_seconds)
        .load_dir(&replay.data)?;
    let (first, last) = gateway.coverage().ok_or("no candles found in the data directory")?;
    clock.set(replay_start(replay.start.as_deref(), first)?);
    log::info!(
        "Replaying {} → {}",
        clock.now().format("%Y-%m-%d %H:%M"),
        placeholder.timestamp_opt(last, 0).single().ok_or("invalid last timestamp")?.format("%Y-%m-%d %H:%M")
    );

    if cfg.assets.is_empty() {
        let mut open: Vec<String> = gateway
            .open_assets()
            .await?
            .into_iter()
            .filter(|(_, status)| status.open)
            .map(|(asset, _)| asset)
            .collect();
        open.sort();
        log::info!("No assets configured, using every open one: {}", open.join(", "));
        cfg.assets = open;
    }

    // ── Observers ─────────────────────────────────────────────────────────────
    let mut fanout = Fanout::new().with(Arc::new(LogObserver));
    let mut telegram_worker = None;
    match TelegramBot::from_env() {
        Some(bot) => {
            let strategy = build_strategy(&cfg);
            bot.notify_start(strategy.name(), &cfg.assets, cfg.sizing.stake).await;
            let (observer, handle) = TelegramObserver::spawn(bot);
            fanout = fanout.with(Arc::new(observer));
            telegram_worker = Some(handle);
        }
        None => log::info!("Telegram disabled (TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set)"),
    }
    let observer: Arc<dyn RunObserver> = Arc::new(fanout);

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received, stopping after the current step");
            ctrl_c.cancel();
        }
    });

    // ── Run ───────────────────────────────────────────────────────────────────
    let mut engine = Engine::new(cfg, gateway, clock, observer, token);
    let summary = match cli.mode {
        Mode::Replay(_) => engine.run().await,
        Mode::Signals { messages, otc, .. } => {
            let parser = SignalParser::new(SignalParseOptions { force_otc: otc })?;
            let text = std::fs::read_to_string(&messages)?;
            let mut signals = Vec::new();
            for block in text.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
                match parser.parse(block) {
                    Ok(signal) => signals.push(signal),
                    Err(e) => log::warn!("Unparsed message ({}): {}", e, block.replace('\n', " ")),
                }
            }
            log::info!("{} signals queued from {}", signals.len(), messages.display());
            let (tx, rx) = mpsc::channel(signals.len().max(1));
            for signal in signals {
                tx.send(signal).await?;
            }
            drop(tx);
            engine.run_signal_feed(rx).await
        }
    };

    report(&summary);
    if let Some(handle) = telegram_worker {
        if let Err(e) = handle.await {
            log::warn!("Telegram worker ended abnormally: {}", e);
        }
    }
    Ok(())
}

fn replay_start(start: Option<&str>, first_ts: i64) -> Result<DateTime<FixedOffset>, Box<dyn std::error::Error>> {
    match start {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)?),
        None => {
            let utc = FixedOffset::east_opt(0).ok_or("invalid offset")?;
            utc.timestamp_opt(first_ts + WARMUP_SECS, 0).single().ok_or_else(|| "invalid start timestamp".into())
        }
    }
}

fn report(summary: &RunSummary) {
    let s = &summary.stats;
    println!();
    println!("  ┌─────────────────────────────────────────────┐");
    println!("  │  SESSION  {}", summary.reason);
    println!("  ├─────────────────────────────────────────────┤");
    println!("  │  Operations     {:>6}", s.ops);
    println!("  │  Entries        {:>6}   ({} W / {} L)", summary.entries, s.wins, s.losses);
    println!("  │  Win Rate       {:>6.1}%", s.win_rate_percent);
    println!("  │  Result         {:>+9.2}", summary.profit);
    println!("  └─────────────────────────────────────────────┘");
}
