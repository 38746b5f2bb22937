// Live exchange tick adapter.
//
// Only meaningful for exchange-traded codes. The endpoint reports the last
// price (f43), previous close (f60), change percent (f170) and name (f58)
// as numeric JSON fields. A ~0 last price means the instrument is suspended
// or the session has not opened, in which case the previous close stands in.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::SourceError;
use crate::quote::with_scale;
use crate::sources::{Snapshot, Source};

/// Prices at or below this are treated as "no trade yet".
const ZERO_EPSILON: f64 = 0.0001;

pub struct RealtimeAdapter {
    http: reqwest::Client,
    base: String,
}

impl RealtimeAdapter {
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }
}

#[async_trait]
impl Source for RealtimeAdapter {
    async fn fetch(&self, code: &str) -> Result<Snapshot, SourceError> {
        let url = format!(
            "{}/api/qt/stock/get?secid={}.{}&fields=f43,f57,f58,f169,f170,f46,f60",
            self.base,
            market_segment(code),
            code
        );
        let body = self.http.get(&url).send().await?.text().await?;
        parse_realtime(&body)
    }
}

/// Shanghai-listed codes (5xx, 6xx) live in market segment 1, the rest in 0.
pub(crate) fn market_segment(code: &str) -> &'static str {
    if code.starts_with('5') || code.starts_with('6') {
        "1"
    } else {
        "0"
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<Tick>,
}

#[derive(Deserialize)]
struct Tick {
    /// Last traded price.
    f43: Option<f64>,
    /// Previous close.
    f60: Option<f64>,
    /// Change percent.
    f170: Option<f64>,
    /// Display name.
    f58: Option<String>,
}

/// Parse the realtime endpoint's JSON body into a snapshot.
///
/// `as_of` is left empty — the caller stamps the observation time.
pub(crate) fn parse_realtime(body: &str) -> Result<Snapshot, SourceError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("realtime payload: {e}")))?;

    let tick = envelope
        .data
        .ok_or_else(|| SourceError::no_data("realtime payload has no data object"))?;

    let mut price = tick.f43.unwrap_or(0.0);
    if price <= ZERO_EPSILON {
        price = tick.f60.unwrap_or(0.0);
    }
    if price <= ZERO_EPSILON {
        return Err(SourceError::no_data("realtime price and previous close are zero"));
    }

    let value = Decimal::try_from(price)
        .map_err(|e| SourceError::Parse(format!("realtime price {price}: {e}")))?;
    let change = Decimal::try_from(tick.f170.unwrap_or(0.0))
        .map_err(|e| SourceError::Parse(format!("realtime change percent: {e}")))?;

    Ok(Snapshot {
        name: tick.f58.unwrap_or_default(),
        value: with_scale(value, 3),
        change_percent: with_scale(change, 2),
        as_of: String::new(),
    })
}
