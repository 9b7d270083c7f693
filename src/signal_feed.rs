//! Parser for channel-style trade signals, e.g.
//!
//! ```text
//! 🔥 Ativo: EUR/USD
//! ⏰ Entrada: 14:35
//! ⌛ Expiração: M5
//! 🟢 COMPRA
//! ```

use chrono::NaiveTime;
use regex::Regex;

use crate::types::TradeDirection;

#[derive(Debug, thiserror::Error)]
pub enum SignalParseError {
    #[error("signal pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
    #[error("no asset in message")]
    MissingAsset,
    #[error("no direction (COMPRA/VENDA) in message")]
    MissingDirection,
    #[error("no entry time in message")]
    MissingEntryTime,
    #[error("invalid entry time {0}")]
    InvalidEntryTime(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalParseOptions {
    /// Append `-OTC` to assets that lack it.
    pub force_otc: bool,
}

/// Signal handed to the engine's feed loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalSignal {
    pub asset: String,
    pub direction: TradeDirection,
    pub expiry_minutes: Option<u32>,
    /// Wall-clock minute of the entry, in the engine's local time.
    pub entry_at: NaiveTime,
}

pub struct SignalParser {
    options: SignalParseOptions,
    asset: Regex,
    sell: Regex,
    buy: Regex,
    expiry: Regex,
    entry: Regex,
}

impl SignalParser {
    pub fn new(options: SignalParseOptions) -> Result<Self, SignalParseError> {
        Ok(SignalParser {
            options,
            asset: Regex::new(r"(?i)Ativo:\s*([A-Z/]+(?:-OTC)?)")?,
            sell: Regex::new(r"(?i)\b(?:VENDA|PUT)\b")?,
            buy: Regex::new(r"(?i)\b(?:COMPRA|CALL)\b")?,
            expiry: Regex::new(r"(?i)Expira\w*:\s*M(\d+)")?,
            entry: Regex::new(r"Entrada:\s*(\d{2}:\d{2})")?,
        })
    }

    pub fn parse(&self, text: &str) -> Result<ExternalSignal, SignalParseError> {
        let raw = self.asset.captures(text).ok_or(SignalParseError::MissingAsset)?;
        let mut asset = raw[1].replace('/', "").to_uppercase();
        if self.options.force_otc && !asset.ends_with("-OTC") {
            asset.push_str("-OTC");
        }

        // sell wins when both words appear
        let direction = if self.sell.is_match(text) {
            TradeDirection::Put
        } else if self.buy.is_match(text) {
            TradeDirection::Call
        } else {
            return Err(SignalParseError::MissingDirection);
        };

        let expiry_minutes = self
            .expiry
            .captures(text)
            .and_then(|c| c[1].parse::<u32>().ok())
            .filter(|m| *m > 0);

        let hhmm = self.entry.captures(text).ok_or(SignalParseError::MissingEntryTime)?;
        let entry_at = NaiveTime::parse_from_str(&hhmm[1], "%H:%M")
            .map_err(|_| SignalParseError::InvalidEntryTime(hhmm[1].to_string()))?;

        Ok(ExternalSignal { asset, direction, expiry_minutes, entry_at })
    }
}

pub fn parse_signal(text: &str, options: SignalParseOptions) -> Result<ExternalSignal, SignalParseError> {
    SignalParser::new(options)?.parse(text)
}
