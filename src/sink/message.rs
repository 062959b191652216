use fastnum::UD256;
use serde::Serialize;

use crate::{
    num,
    types::{PriceQuote, TradeEvent, TradeKind},
};

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━━━";

/// Inline button opening a URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

/// Rendered notification, Markdown text plus rows of link buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub buttons: Vec<Vec<LinkButton>>,
}

/// Layout of trade notifications.
#[derive(Clone, Debug)]
pub struct MessageTemplate {
    explorer_url: String,
    exchange_url: Option<String>,
    quote_symbol: String,
}

impl LinkButton {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

impl MessageTemplate {
    /// Creates a template linking transactions and traders to the block explorer.
    pub fn new(explorer_url: &str) -> Self {
        Self {
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            exchange_url: None,
            quote_symbol: "USDT".to_string(),
        }
    }

    /// Adds exchange site and trading page buttons.
    pub fn with_exchange_url(mut self, exchange_url: &str) -> Self {
        self.exchange_url = Some(exchange_url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_quote_symbol(mut self, symbol: &str) -> Self {
        self.quote_symbol = symbol.to_string();
        self
    }

    pub fn render(&self, event: &TradeEvent, quote: &PriceQuote) -> Message {
        let title = match event.kind() {
            TradeKind::Buy => "🟢 *BUY DETECTED!* 🚀",
            TradeKind::Sell => "🔴 *SELL DETECTED!* 📉",
        };
        let price = match quote.is_known().then(|| fixed(quote.value, 6)).flatten() {
            Some(price) => format!("`{price} {}`", self.quote_symbol),
            None => "`Market Price`".to_string(),
        };
        let trader = event.trader().to_string();

        let mut text = format!(
            "{title}\n{SEPARATOR}\n\
             💰 *Amount:* `{amount} {symbol}`\n\
             💎 *Tokens:* `{tokens}`\n\
             🏷 *Price:* {price}\n\n\
             👤 *User:* [{short}...]({explorer}/address/{trader})\n\
             {SEPARATOR}",
            amount = fixed(event.quote_amount(), 2)
                .unwrap_or_else(|| event.quote_amount().to_string()),
            symbol = self.quote_symbol,
            tokens = trimmed(event.base_amount(), 4)
                .map_or_else(|| event.base_amount().to_string(), |tokens| grouped(&tokens)),
            short = &trader[..6],
            explorer = self.explorer_url,
        );
        if event.is_historical() {
            text.push_str(&format!("\n⏪ _Backfilled from block {}_", event.block_number()));
        }

        let tx_details = LinkButton::new(
            "🔍 Transaction Details",
            format!("{}/tx/{}", self.explorer_url, event.tx_hash()),
        );
        let buttons = match &self.exchange_url {
            Some(exchange) => vec![
                vec![LinkButton::new("🌐 Exchange", exchange.clone()), tx_details],
                vec![LinkButton::new(
                    "🚀 Start Trading Now",
                    format!("{exchange}/trade"),
                )],
            ],
            None => vec![vec![tx_details]],
        };

        Message { text, buttons }
    }
}

/// Decimal with exactly `decimals` fractional digits, `None` if the value is
/// too large to be represented at that precision.
fn fixed(value: UD256, decimals: u8) -> Option<String> {
    let digits = num::Converter::new(decimals)
        .checked_to_unsigned(value)?
        .to_string();
    if decimals == 0 {
        return Some(digits);
    }
    let decimals = decimals as usize;
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int, frac) = padded.split_at(padded.len() - decimals);
    Some(format!("{int}.{frac}"))
}

/// Decimal with at most `decimals` fractional digits, trailing zeros removed.
fn trimmed(value: UD256, decimals: u8) -> Option<String> {
    let s = fixed(value, decimals)?;
    if decimals == 0 {
        return Some(s);
    }
    Some(s.trim_end_matches('0').trim_end_matches('.').to_string())
}

/// Groups integer part digits by thousands.
fn grouped(value: &str) -> String {
    let (int, frac) = match value.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (value, None),
    };
    let mut out = String::with_capacity(value.len() + int.len() / 3);
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(frac);
    }
    out
}
