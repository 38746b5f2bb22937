// Upstream source adapters.
//
// Each adapter fetches one endpoint and parses it into a partial quote
// (`Snapshot`). Adapters make a single attempt with the shared client's
// fixed timeout — no retries; the reconciler handles fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use rust_decimal::Decimal;

use crate::error::SourceError;

pub mod confirmed;
pub mod detail;
pub mod estimate;
pub mod realtime;
pub mod search;

pub use confirmed::ConfirmedAdapter;
pub use detail::{DetailClient, FundDetail, Holding};
pub use estimate::EstimateAdapter;
pub use realtime::RealtimeAdapter;
pub use search::{SearchClient, SearchHit};

// ---------------------------------------------------------------------------
// Snapshot and the Source trait
// ---------------------------------------------------------------------------

/// Partial quote extracted from one upstream source. Fields a source does
/// not report are left at their defaults (empty string / zero).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Display name; empty when the source does not carry one.
    pub name: String,
    /// Price or NAV.
    pub value: Decimal,
    /// Signed percentage change.
    pub change_percent: Decimal,
    /// Date or timestamp string the value applies to. The realtime adapter
    /// leaves this empty; the reconciler stamps it from its clock.
    pub as_of: String,
}

/// A single upstream quote source: `fetch(code)` returns a partial quote
/// or a typed failure.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, code: &str) -> Result<Snapshot, SourceError>;
}

// ---------------------------------------------------------------------------
// Shared HTTP client
// ---------------------------------------------------------------------------

/// The upstream endpoints reject non-browser requests.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const FUND_REFERER: &str = "http://fund.eastmoney.com/";

/// Build the shared HTTP client used by all adapters: fixed request timeout,
/// browser-style headers.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(REFERER, HeaderValue::from_static(FUND_REFERER));

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
}
