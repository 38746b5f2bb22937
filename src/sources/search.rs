// Fuzzy instrument search against the suggest endpoint.

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub struct SearchClient {
    http: reqwest::Client,
    base: String,
}

/// One search suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub code: String,
    pub name: String,
    /// Category description, e.g. "指数型-股票".
    pub kind: String,
}

impl SearchClient {
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }

    /// Look up instruments matching `keyword` (code fragment or name).
    pub async fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, SourceError> {
        let url = format!("{}/FundSearch/api/FundSearchAPI.ashx", self.base);
        let body = self
            .http
            .get(&url)
            .query(&[("m", "1"), ("key", keyword)])
            .send()
            .await?
            .text()
            .await?;
        parse_search(&body)
    }
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(rename = "Datas", default)]
    datas: Vec<SearchRow>,
}

#[derive(Deserialize)]
struct SearchRow {
    #[serde(rename = "CODE", default)]
    code: String,
    #[serde(rename = "NAME", default)]
    name: String,
    #[serde(rename = "CATEGORYDESC", default)]
    category: String,
}

pub(crate) fn parse_search(body: &str) -> Result<Vec<SearchHit>, SourceError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("search payload: {e}")))?;

    Ok(envelope
        .datas
        .into_iter()
        .map(|row| SearchHit {
            code: row.code,
            name: row.name,
            kind: row.category,
        })
        .collect())
}
