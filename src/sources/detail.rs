// Fund detail: disclosed top holdings with live stock quotes.
//
// Two-step lookup: the basic-information endpoint yields the position list
// (stock name + code), then one batched quote request decorates each
// position with its live price and change percent. The quote step is
// best-effort; positions without a usable quote keep `None`.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::quote::with_scale;
use crate::sources::realtime::market_segment;

pub struct DetailClient {
    http: reqwest::Client,
    detail_base: String,
    quote_base: String,
}

/// A fund's disclosed position list.
#[derive(Debug, Clone, PartialEq)]
pub struct FundDetail {
    pub code: String,
    pub holdings: Vec<Holding>,
}

/// One position in the fund's top holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub code: String,
    pub name: String,
    /// Live price; absent when the stock has no quote this session.
    pub price: Option<Decimal>,
    pub change_percent: Option<Decimal>,
}

impl DetailClient {
    /// `quote_base` is the realtime endpoint base; the batched stock quotes
    /// come from the same upstream as the fund tick.
    pub fn new(
        http: reqwest::Client,
        detail_base: impl Into<String>,
        quote_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            detail_base: detail_base.into(),
            quote_base: quote_base.into(),
        }
    }

    /// Fetch the position list for `code` and decorate it with live quotes.
    pub async fn detail(&self, code: &str) -> Result<FundDetail, SourceError> {
        let url = format!(
            "{}/FundMNewApi/FundMNBasicInformation?FCODE={}&deviceid=123&plat=Iphone&product=EFund&version=6.0.0",
            self.detail_base, code
        );
        let body = self.http.get(&url).send().await?.text().await?;
        let mut holdings = parse_position_list(&body)?;

        if !holdings.is_empty() {
            if let Err(e) = self.decorate_quotes(&mut holdings).await {
                debug!(code, error = %e, "holding quotes unavailable");
            }
        }

        Ok(FundDetail {
            code: code.to_string(),
            holdings,
        })
    }

    async fn decorate_quotes(&self, holdings: &mut [Holding]) -> Result<(), SourceError> {
        let secids: Vec<String> = holdings
            .iter()
            .map(|h| format!("{}.{}", market_segment(&h.code), h.code))
            .collect();
        let url = format!(
            "{}/api/qt/ulist.np/get?secids={}&fields=f12,f14,f2,f3",
            self.quote_base,
            secids.join(",")
        );
        let body = self.http.get(&url).send().await?.text().await?;
        apply_quotes(holdings, &parse_batch_quotes(&body)?);
        Ok(())
    }
}

#[derive(Deserialize)]
struct InfoEnvelope {
    #[serde(rename = "Datas")]
    datas: Option<InfoDatas>,
}

#[derive(Deserialize)]
struct InfoDatas {
    // The upstream field name misspells "invest".
    #[serde(rename = "InverstPositionList", default)]
    positions: Vec<PositionRow>,
}

#[derive(Deserialize)]
struct PositionRow {
    #[serde(rename = "GPNM", default)]
    name: String,
    #[serde(rename = "GPDM", default)]
    code: String,
}

/// Parse the basic-information payload into undecorated holdings. A missing
/// or empty position list is a valid answer (newly launched funds disclose
/// nothing), not an error.
pub(crate) fn parse_position_list(body: &str) -> Result<Vec<Holding>, SourceError> {
    let envelope: InfoEnvelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("fund detail payload: {e}")))?;
    let positions = envelope.datas.map(|d| d.positions).unwrap_or_default();

    Ok(positions
        .into_iter()
        .filter(|p| !p.code.is_empty())
        .map(|p| Holding {
            code: p.code,
            name: p.name,
            price: None,
            change_percent: None,
        })
        .collect())
}

#[derive(Deserialize)]
struct QuoteEnvelope {
    data: Option<QuoteData>,
}

#[derive(Deserialize)]
struct QuoteData {
    #[serde(default)]
    diff: Vec<QuoteRow>,
}

#[derive(Deserialize)]
struct QuoteRow {
    /// Stock code.
    #[serde(default)]
    f12: String,
    /// Last price.
    #[serde(default)]
    f2: f64,
    /// Change percent.
    #[serde(default)]
    f3: f64,
}

/// Parse the batched quote payload into a code → (price, change) map.
/// A zero price marks a suspended stock and is dropped from the map.
pub(crate) fn parse_batch_quotes(
    body: &str,
) -> Result<HashMap<String, (Decimal, Decimal)>, SourceError> {
    let envelope: QuoteEnvelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("batch quote payload: {e}")))?;
    let rows = envelope.data.map(|d| d.diff).unwrap_or_default();

    let mut quotes = HashMap::new();
    for row in rows {
        if row.f2 == 0.0 {
            continue;
        }
        let price = Decimal::try_from(row.f2)
            .map_err(|e| SourceError::Parse(format!("stock price {}: {e}", row.f2)))?;
        let change = Decimal::try_from(row.f3)
            .map_err(|e| SourceError::Parse(format!("stock change {}: {e}", row.f3)))?;
        quotes.insert(row.f12, (with_scale(price, 2), with_scale(change, 2)));
    }
    Ok(quotes)
}

fn apply_quotes(holdings: &mut [Holding], quotes: &HashMap<String, (Decimal, Decimal)>) {
    for holding in holdings {
        if let Some((price, change)) = quotes.get(&holding.code) {
            holding.price = Some(*price);
            holding.change_percent = Some(*change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_BODY: &str = r#"{"Datas":{"InverstPositionList":[
        {"GPNM":"贵州茅台","GPDM":"600519","JZBL":"15.2"},
        {"GPNM":"五粮液","GPDM":"000858","JZBL":"14.1"}
    ]}}"#;

    const QUOTE_BODY: &str = r#"{"data":{"diff":[
        {"f12":"600519","f14":"贵州茅台","f2":1890.5,"f3":1.23},
        {"f12":"000858","f14":"五粮液","f2":0,"f3":0}
    ]}}"#;

    #[test]
    fn parses_position_list() {
        let holdings = parse_position_list(INFO_BODY).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].code, "600519");
        assert_eq!(holdings[0].name, "贵州茅台");
        assert!(holdings[0].price.is_none());
        assert!(holdings[0].change_percent.is_none());
    }

    #[test]
    fn missing_datas_is_empty_list() {
        assert!(parse_position_list("{}").unwrap().is_empty());
        assert!(parse_position_list(r#"{"Datas":null}"#).unwrap().is_empty());
        assert!(parse_position_list(r#"{"Datas":{}}"#).unwrap().is_empty());
    }

    #[test]
    fn codeless_positions_are_dropped() {
        let body = r#"{"Datas":{"InverstPositionList":[{"GPNM":"x","GPDM":""}]}}"#;
        assert!(parse_position_list(body).unwrap().is_empty());
    }

    #[test]
    fn garbage_info_body_is_parse_error() {
        assert!(matches!(
            parse_position_list("<html>"),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn parses_batch_quotes_and_skips_suspended() {
        let quotes = parse_batch_quotes(QUOTE_BODY).unwrap();
        assert_eq!(quotes.len(), 1);
        let (price, change) = &quotes["600519"];
        assert_eq!(price.to_string(), "1890.50");
        assert_eq!(change.to_string(), "1.23");
        assert!(!quotes.contains_key("000858"));
    }

    #[test]
    fn missing_quote_data_is_empty_map() {
        assert!(parse_batch_quotes(r#"{"data":null}"#).unwrap().is_empty());
        assert!(parse_batch_quotes("{}").unwrap().is_empty());
    }

    #[test]
    fn garbage_quote_body_is_parse_error() {
        assert!(matches!(
            parse_batch_quotes("not json"),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn quotes_merge_onto_matching_holdings_only() {
        let mut holdings = parse_position_list(INFO_BODY).unwrap();
        let quotes = parse_batch_quotes(QUOTE_BODY).unwrap();
        apply_quotes(&mut holdings, &quotes);

        assert_eq!(holdings[0].price.unwrap().to_string(), "1890.50");
        assert_eq!(holdings[0].change_percent.unwrap().to_string(), "1.23");
        // Suspended stock never got a quote.
        assert!(holdings[1].price.is_none());
        assert!(holdings[1].change_percent.is_none());
    }

    #[tokio::test]
    async fn fetch_against_canned_http_server() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Serves the position list first, then the batched quotes. Responses
        // close the connection so the client dials fresh for the second call.
        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();

                let payload = if request.contains("FundMNBasicInformation") {
                    INFO_BODY
                } else {
                    QUOTE_BODY
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                    payload.len(),
                    payload
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
        });

        let http = crate::sources::build_client(std::time::Duration::from_secs(5)).unwrap();
        let client = DetailClient::new(http, format!("http://{addr}"), format!("http://{addr}"));

        let detail = client.detail("161725").await.unwrap();
        assert_eq!(detail.code, "161725");
        assert_eq!(detail.holdings.len(), 2);
        assert_eq!(detail.holdings[0].price.unwrap().to_string(), "1890.50");
        assert!(detail.holdings[1].price.is_none());

        let _ = server.await;
    }

    #[tokio::test]
    async fn unreachable_quote_endpoint_leaves_holdings_undecorated() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                INFO_BODY.len(),
                INFO_BODY
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });

        let http = crate::sources::build_client(std::time::Duration::from_secs(1)).unwrap();
        // Port 1 on localhost is essentially never listening.
        let client = DetailClient::new(http, format!("http://{addr}"), "http://127.0.0.1:1");

        let detail = client.detail("161725").await.unwrap();
        assert_eq!(detail.holdings.len(), 2);
        assert!(detail.holdings.iter().all(|h| h.price.is_none()));

        let _ = server.await;
    }
}
