// Intraday estimated-NAV adapter.
//
// The endpoint returns a JavaScript callback wrapping a JSON object, e.g.
// `jsonpgz({"fundcode":"161725","name":"...","gsz":"1.2340",...});`.
// Extraction is "outermost matching brace pair", then a plain JSON parse.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::SourceError;
use crate::sources::{Snapshot, Source};

pub struct EstimateAdapter {
    http: reqwest::Client,
    base: String,
}

impl EstimateAdapter {
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }
}

#[async_trait]
impl Source for EstimateAdapter {
    async fn fetch(&self, code: &str) -> Result<Snapshot, SourceError> {
        // rt is a cache-buster, not part of the quote semantics.
        let url = format!(
            "{}/js/{}.js?rt={}",
            self.base,
            code,
            Utc::now().timestamp()
        );
        let body = self.http.get(&url).send().await?.text().await?;
        parse_estimate(&body)
    }
}

/// Slice out the outermost `{...}` pair of a JSONP blob.
pub(crate) fn extract_jsonp(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if start < end {
        Some(&raw[start..=end])
    } else {
        None
    }
}

#[derive(Deserialize)]
struct EstimatePayload {
    #[serde(default)]
    name: String,
    /// Estimated NAV, as a decimal string.
    #[serde(default)]
    gsz: String,
    /// Estimated change percent, as a decimal string.
    #[serde(default)]
    gszzl: String,
    /// Estimate timestamp, "YYYY-MM-DD HH:MM".
    #[serde(default)]
    gztime: String,
}

/// Parse a JSONP estimate body into a snapshot.
pub(crate) fn parse_estimate(body: &str) -> Result<Snapshot, SourceError> {
    let json = extract_jsonp(body)
        .ok_or_else(|| SourceError::parse("estimate payload has no jsonp braces"))?;

    let payload: EstimatePayload = serde_json::from_str(json)
        .map_err(|e| SourceError::Parse(format!("estimate payload: {e}")))?;

    if payload.gsz.is_empty() {
        return Err(SourceError::no_data("estimate carries no NAV"));
    }
    let value: Decimal = payload
        .gsz
        .parse()
        .map_err(|e| SourceError::Parse(format!("estimate NAV `{}`: {e}", payload.gsz)))?;

    let change_percent = if payload.gszzl.is_empty() {
        Decimal::ZERO
    } else {
        payload
            .gszzl
            .parse()
            .map_err(|e| SourceError::Parse(format!("estimate change `{}`: {e}", payload.gszzl)))?
    };

    Ok(Snapshot {
        name: payload.name,
        value,
        change_percent,
        as_of: payload.gztime,
    })
}
