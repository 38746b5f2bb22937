// End-of-day confirmed NAV adapter.
//
// The endpoint returns an HTML table of historical NAV rows, newest first.
// Only the first body row matters: cell 0 = date, cell 1 = NAV,
// cell 3 = change percent. The extractor is a small scanner over the
// first `<tbody>` row; the upstream markup is machine-generated and flat.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::SourceError;
use crate::sources::{Snapshot, Source};

/// Date, NAV, (accumulated NAV), change percent.
const REQUIRED_COLUMNS: usize = 4;

pub struct ConfirmedAdapter {
    http: reqwest::Client,
    base: String,
}

impl ConfirmedAdapter {
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }
}

#[async_trait]
impl Source for ConfirmedAdapter {
    async fn fetch(&self, code: &str) -> Result<Snapshot, SourceError> {
        let url = format!(
            "{}/f10/F10DataApi.aspx?type=lsjz&code={}&page=1&per=1",
            self.base, code
        );
        let body = self.http.get(&url).send().await?.text().await?;
        parse_confirmed(&body)
    }
}

/// Text content of the cells of the first `<tbody>` row, inner tags stripped.
pub(crate) fn first_row_cells(html: &str) -> Option<Vec<String>> {
    let tbody = &html[html.find("<tbody")?..];
    let row = &tbody[tbody.find("<tr")?..];
    let row_body_start = row.find('>')? + 1;
    let row_body_end = row.find("</tr>").unwrap_or(row.len());
    if row_body_start >= row_body_end {
        return None;
    }
    let mut rest = &row[row_body_start..row_body_end];

    let mut cells = Vec::new();
    while let Some(td) = rest.find("<td") {
        let cell = &rest[td..];
        let open_end = cell.find('>')? + 1;
        let close = cell.find("</td>")?;
        if open_end > close {
            return None;
        }
        cells.push(strip_tags(&cell[open_end..close]).trim().to_string());
        rest = &cell[close + "</td>".len()..];
    }

    if cells.is_empty() {
        None
    } else {
        Some(cells)
    }
}

/// Drop anything between `<` and `>`, keeping the text in between.
fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parse the confirmed-NAV table body into a snapshot.
pub(crate) fn parse_confirmed(body: &str) -> Result<Snapshot, SourceError> {
    let cells =
        first_row_cells(body).ok_or_else(|| SourceError::no_data("confirmed table has no rows"))?;
    if cells.len() < REQUIRED_COLUMNS {
        return Err(SourceError::NoData(format!(
            "confirmed row has {} of {REQUIRED_COLUMNS} columns",
            cells.len()
        )));
    }

    let value: Decimal = cells[1]
        .parse()
        .map_err(|e| SourceError::Parse(format!("confirmed NAV `{}`: {e}", cells[1])))?;

    let change_text = cells[3].trim_end_matches('%');
    let change_percent = if change_text.is_empty() {
        Decimal::ZERO
    } else {
        change_text
            .parse()
            .map_err(|e| SourceError::Parse(format!("confirmed change `{}`: {e}", cells[3])))?
    };

    Ok(Snapshot {
        name: String::new(),
        value,
        change_percent,
        as_of: cells[0].clone(),
    })
}
