//! Catalog: replays the configured strategy over data/*.csv and prints the hit rate
//! per martingale level for every asset.
//! Run: cargo run --bin catalog --release -- --minutes 240

use std::path::{Path, PathBuf};

use binary_bot::candles::{self, Classifier};
use binary_bot::catalog::{catalog, repetition_index, CatalogReport, RepetitionIndex};
use binary_bot::config::RunConfig;
use binary_bot::strategy::build_strategy;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "catalog")]
struct Cli {
    /// Directory of <ASSET>.csv files
    #[arg(long, default_value = "data")]
    data: PathBuf,
    /// Run configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Minutes of the most recent history to catalog
    #[arg(long, default_value_t = 120)]
    minutes: usize,
    /// Write every report as JSON lines to this file
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let strategy = build_strategy(&cfg);
    let classifier = Classifier::from_sensitivity(cfg.doji_sensitivity());
    let levels = cfg.sizing.max_level();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║  CATALOG  —  {:<16}  —  last {:>5} min       ║", strategy.name(), cli.minutes);
    println!("║  Martingale levels: {}   Doji filter: {:<5}             ║", levels, cfg.doji.enabled);
    println!("╚═══════════════════════════════════════════════════════╝");

    let mut files = csv_files(&cli.data)?;
    files.sort();
    if files.is_empty() {
        eprintln!("  ⚠  No CSV files in {:?}", cli.data);
        return Ok(());
    }

    let mut rows = Vec::new();
    for path in files {
        let asset = path.file_stem().and_then(|s| s.to_str()).unwrap_or("?").to_string();
        let series = match candles::load_csv(&path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("  ⚠  {e}");
                continue;
            }
        };
        let need = cli.minutes + strategy.window_len() + strategy.entry_offset_candles() as usize + levels as usize;
        let recent = candles::tail(&series, need);
        let report = catalog(recent, strategy.as_ref(), levels, &classifier, cfg.adx.period, cfg.timing.candle_seconds);
        let repetition = repetition_index(recent, &classifier);
        print_asset(&asset, report.as_ref(), repetition);
        rows.push((asset, report, repetition));
    }

    print_ranking(&rows);

    if let Some(out) = &cli.json {
        let mut lines = String::new();
        for (asset, report, repetition) in &rows {
            let row = serde_json::json!({ "asset": asset, "report": report, "repetition": repetition });
            lines.push_str(&row.to_string());
            lines.push('\n');
        }
        std::fs::write(out, lines)?;
        println!("\n  📄 Reports saved: {:?}\n", out);
    }
    Ok(())
}

fn csv_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            out.push(path);
        }
    }
    Ok(out)
}

fn print_asset(asset: &str, report: Option<&CatalogReport>, repetition: Option<RepetitionIndex>) {
    println!();
    println!("  ┌─────────────────────────────────────────────┐");
    println!("  │  {asset}");
    println!("  ├─────────────────────────────────────────────┤");
    let Some(r) = report else {
        println!("  │  No complete cycle in the selected history");
        println!("  └─────────────────────────────────────────────┘");
        return;
    };
    println!("  │  Cycles         {:>6}   ({} W / {} L)", r.total, r.wins(), r.losses);
    for (level, wins) in r.wins_per_level.iter().enumerate() {
        let label = if level == 0 { "Entry".to_string() } else { format!("Gale {level}") };
        println!("  │  {:<14} {:>6}", label, wins);
    }
    println!("  │  Assertiveness  {:>6.1}%", r.assertiveness);
    println!("  │  Longest run    {:>6}", r.max_streak);
    match r.adx {
        Some(adx) => println!("  │  ADX            {:>6.1}", adx),
        None => println!("  │  ADX               n/a"),
    }
    match repetition {
        Some(x) => println!("  │  Repetition     {:>6.1}%  ({}/{})", x.percent, x.repeats, x.total),
        None => println!("  │  Repetition        n/a"),
    }
    println!("  └─────────────────────────────────────────────┘");
}

fn print_ranking(rows: &[(String, Option<CatalogReport>, Option<RepetitionIndex>)]) {
    let mut ranked: Vec<(&str, f64)> = rows
        .iter()
        .filter_map(|(asset, report, _)| report.as_ref().map(|r| (asset.as_str(), r.assertiveness)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    println!();
    println!("  Ranking by assertiveness:");
    for (i, (asset, pct)) in ranked.iter().enumerate() {
        println!("    {:>2}. {:<14} {:>5.1}%", i + 1, asset, pct);
    }
}
