// Error taxonomy for the quote engine.
//
// Adapter failures are always recovered locally by the reconciler (fall back
// to the next source); only `ReconcileError::Exhausted` escapes a single
// reconciliation, and the batch orchestrator recovers even that by omitting
// the code from its results.

use thiserror::Error;

/// Failure of a single upstream source fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure: connection refused, DNS, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The source responded but the payload could not be decoded.
    #[error("malformed payload: {0}")]
    Parse(String),

    /// The source responded with a well-formed but unusable payload
    /// (no rows, zero price, empty value).
    #[error("no usable data: {0}")]
    NoData(String),
}

impl SourceError {
    /// Shorthand for a parse failure with a static description.
    pub fn parse(msg: impl Into<String>) -> Self {
        SourceError::Parse(msg.into())
    }

    /// Shorthand for an empty/zero-value failure.
    pub fn no_data(msg: impl Into<String>) -> Self {
        SourceError::NoData(msg.into())
    }
}

/// Failure of a full reconciliation: every source was tried and none
/// produced a usable quote.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no source produced data for instrument {code}")]
    Exhausted { code: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_messages() {
        let e = SourceError::parse("unbalanced jsonp");
        assert_eq!(e.to_string(), "malformed payload: unbalanced jsonp");

        let e = SourceError::no_data("price is zero");
        assert_eq!(e.to_string(), "no usable data: price is zero");
    }

    #[test]
    fn exhausted_mentions_code() {
        let e = ReconcileError::Exhausted {
            code: "161725".to_string(),
        };
        assert!(e.to_string().contains("161725"));
    }
}
