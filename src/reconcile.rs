// Quote reconciliation: precedence/freshness resolution over the three
// upstream sources.
//
// Ordered fallback chain per code:
//   1. exchange-traded codes try the live tick first (tagged Realtime);
//      the estimated NAV from the same call prices the premium rate
//   2. otherwise the intraday estimate (tagged Estimated)
//   3. the confirmed end-of-day NAV overrides a non-realtime estimate when
//      it is at least as recent, and stands alone when nothing else exists
//
// Realtime data is always most authoritative when present; confirmed data
// beats an estimate only if it is at least as recent; otherwise the estimate,
// being closer to "now", is preferred even though unconfirmed.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use crate::clock::{is_international, us_market_session, Clock};
use crate::error::ReconcileError;
use crate::quote::{format_signed_percent, Freshness, InstrumentClass, Quote};
use crate::sources::{Snapshot, Source};

/// Format of the realtime observation stamp.
const REALTIME_STAMP: &str = "%Y-%m-%d %H:%M";

/// Anything that can resolve one instrument code into a quote. The batch
/// orchestrator depends on this seam so its concurrency behavior can be
/// tested with instrumented implementations.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, code: &str) -> Result<Quote, ReconcileError>;
}

pub struct Reconciler {
    realtime: Arc<dyn Source>,
    estimate: Arc<dyn Source>,
    confirmed: Arc<dyn Source>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        realtime: Arc<dyn Source>,
        estimate: Arc<dyn Source>,
        confirmed: Arc<dyn Source>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            realtime,
            estimate,
            confirmed,
            clock,
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, code: &str) -> Result<Quote, ReconcileError> {
        // Realtime only applies to exchange-traded codes.
        let realtime = match InstrumentClass::of(code) {
            InstrumentClass::ExchangeTraded => match self.realtime.fetch(code).await {
                Ok(tick) => Some(tick),
                Err(e) => {
                    debug!(code, error = %e, "realtime source unavailable");
                    None
                }
            },
            InstrumentClass::OffExchange => None,
        };

        // The estimate is the primary source when there is no realtime tick,
        // and the premium reference when there is one.
        let estimate = match self.estimate.fetch(code).await {
            Ok(snap) => Some(snap),
            Err(e) => {
                debug!(code, error = %e, "estimate source unavailable");
                None
            }
        };

        // Always fetched as the fallback reference; errors only matter if it
        // ends up being the only source.
        let confirmed = match self.confirmed.fetch(code).await {
            Ok(snap) => Some(snap),
            Err(e) => {
                debug!(code, error = %e, "confirmed source unavailable");
                None
            }
        };

        let mut quote = match (realtime, estimate) {
            (Some(tick), estimate) => {
                self.realtime_quote(code, tick, estimate.as_ref(), confirmed.as_ref())
            }
            (None, Some(est)) => {
                let mut quote = quote_from(code, Freshness::Estimated, &est);
                apply_confirmed_override(&mut quote, confirmed.as_ref());
                quote
            }
            (None, None) => match confirmed {
                Some(conf) => quote_from(code, Freshness::Confirmed, &conf),
                None => {
                    return Err(ReconcileError::Exhausted {
                        code: code.to_string(),
                    })
                }
            },
        };

        self.annotate_session(&mut quote);
        Ok(quote)
    }
}

impl Reconciler {
    /// Build a realtime-tagged quote, stamping the observation time from the
    /// injected clock and pricing the premium against the estimated NAV
    /// (falling back to the confirmed NAV when no estimate is available).
    fn realtime_quote(
        &self,
        code: &str,
        tick: Snapshot,
        estimate: Option<&Snapshot>,
        confirmed: Option<&Snapshot>,
    ) -> Quote {
        let as_of = self.clock.now().format(REALTIME_STAMP).to_string();

        let nav = estimate.map(|s| s.value).or_else(|| confirmed.map(|s| s.value));
        let premium_rate = match nav {
            Some(nav) if nav > Decimal::ZERO => {
                let rate = (tick.value - nav) / nav * Decimal::ONE_HUNDRED;
                Some(format_signed_percent(rate))
            }
            _ => {
                // Best-effort field: no usable NAV this round, omit silently.
                debug!(code, "no NAV reference, premium rate omitted");
                None
            }
        };

        Quote {
            code: code.to_string(),
            name: tick.name,
            value: tick.value,
            change_percent: tick.change_percent,
            as_of,
            freshness: Freshness::Realtime,
            premium_rate,
        }
    }

    /// Append the market-session annotation for international funds.
    fn annotate_session(&self, quote: &mut Quote) {
        if !is_international(&quote.name) {
            return;
        }
        if let Some(status) = us_market_session(self.clock.now()) {
            quote.as_of.push(' ');
            quote.as_of.push_str(status);
        }
    }
}

/// Confirmed values override an estimate iff the confirmed date is at least
/// as recent as the estimate's date. Dates are zero-padded ISO strings, so
/// lexicographic comparison is chronological.
fn apply_confirmed_override(quote: &mut Quote, confirmed: Option<&Snapshot>) {
    let Some(conf) = confirmed else { return };
    let estimate_date = quote.as_of.split(' ').next().unwrap_or("");
    if conf.as_of.as_str() >= estimate_date {
        quote.value = conf.value;
        quote.change_percent = conf.change_percent;
        quote.as_of = conf.as_of.clone();
        quote.freshness = Freshness::Confirmed;
    }
}

fn quote_from(code: &str, freshness: Freshness, snap: &Snapshot) -> Quote {
    Quote {
        code: code.to_string(),
        name: snap.name.clone(),
        value: snap.value,
        change_percent: snap.change_percent,
        as_of: snap.as_of.clone(),
        freshness,
        premium_rate: None,
    }
}
