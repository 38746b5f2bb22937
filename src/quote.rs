// Core quote data model.
//
// Prices and percentages are carried as `rust_decimal::Decimal` inside the
// engine; string formatting (explicit sign, fixed precision) happens only at
// the serialization boundary in `QuoteMessage`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Freshness
// ---------------------------------------------------------------------------

/// Provenance tag of a resolved quote. Exactly one holds per quote;
/// the tag is the single source of truth for how fresh the value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Live exchange tick.
    Realtime,
    /// Intraday estimated NAV, not yet officially confirmed.
    Estimated,
    /// Officially published end-of-day NAV.
    Confirmed,
}

// ---------------------------------------------------------------------------
// InstrumentClass
// ---------------------------------------------------------------------------

/// Code prefixes of funds that trade continuously on an exchange
/// (ETFs and LOFs on the Shanghai/Shenzhen markets).
const EXCHANGE_PREFIXES: [&str; 5] = ["15", "16", "51", "56", "58"];

/// Whether an instrument trades on an exchange or prices once daily
/// off-exchange. Derived fresh from the code on every reconciliation,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    ExchangeTraded,
    OffExchange,
}

impl InstrumentClass {
    /// Classify an instrument code by its static prefix. No external lookup.
    pub fn of(code: &str) -> Self {
        if EXCHANGE_PREFIXES.iter().any(|p| code.starts_with(p)) {
            InstrumentClass::ExchangeTraded
        } else {
            InstrumentClass::OffExchange
        }
    }
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// One instrument's resolved price state, produced by a single
/// reconciliation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Instrument identifier (stable key).
    pub code: String,
    /// Display name; empty if no source resolved it.
    pub name: String,
    /// Price or NAV.
    pub value: Decimal,
    /// Signed percentage change.
    pub change_percent: Decimal,
    /// Timestamp or date the value applies to, optionally followed by a
    /// market-session annotation for international funds.
    pub as_of: String,
    pub freshness: Freshness,
    /// Formatted premium of the live price over the estimated NAV
    /// (e.g. "+1.27%"). Present only when both were obtained within the
    /// same reconciliation call.
    pub premium_rate: Option<String>,
}

impl Quote {
    /// Convert to the wire/persistence representation, formatting the
    /// decimal fields as strings.
    pub fn to_message(&self) -> QuoteMessage {
        QuoteMessage {
            code: self.code.clone(),
            name: self.name.clone(),
            value: self.value.to_string(),
            change_percent: self.change_percent.to_string(),
            as_of: self.as_of.clone(),
            freshness: self.freshness,
            premium_rate: self.premium_rate.clone(),
        }
    }
}

/// Serialized form of a [`Quote`]: what the hub broadcasts and the cache
/// stores. Decimal fields are strings so upstream precision survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMessage {
    pub code: String,
    pub name: String,
    pub value: String,
    #[serde(rename = "changePercent")]
    pub change_percent: String,
    #[serde(rename = "asOf")]
    pub as_of: String,
    pub freshness: Freshness,
    #[serde(rename = "premiumRate", skip_serializing_if = "Option::is_none")]
    pub premium_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a percentage with an explicit sign and exactly two decimal places
/// ("+1.27%", "-0.50%", "+0.00%").
pub fn format_signed_percent(rate: Decimal) -> String {
    let mut r = rate.round_dp(2);
    r.rescale(2);
    if r.is_sign_negative() {
        format!("{r}%")
    } else {
        format!("+{r}%")
    }
}

/// Round to `scale` decimal places, keeping trailing zeros ("4.000").
pub fn with_scale(value: Decimal, scale: u32) -> Decimal {
    let mut r = value.round_dp(scale);
    r.rescale(scale);
    r
}
