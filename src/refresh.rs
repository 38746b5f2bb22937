// Batch refresh orchestration.
//
// Deduplicates the holdings/watchlist code union, fans reconciliations out
// under a semaphore-bounded ceiling, and joins all of them before returning.
// Per-code failures are swallowed; the batch as a whole never fails. Each
// success additionally triggers the cache side-effect off the result path.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::QuoteCache;
use crate::quote::Quote;
use crate::reconcile::Reconcile;

/// Default ceiling on simultaneously in-flight reconciliations.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

pub struct RefreshOrchestrator {
    reconciler: Arc<dyn Reconcile>,
    cache: Arc<dyn QuoteCache>,
    max_concurrent: usize,
}

impl RefreshOrchestrator {
    pub fn new(
        reconciler: Arc<dyn Reconcile>,
        cache: Arc<dyn QuoteCache>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            reconciler,
            cache,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Reconcile every code in the union of `holdings` and `watchlist`
    /// exactly once, at most `max_concurrent` in flight at a time.
    ///
    /// Returns once every submitted code has completed (success or failure);
    /// result order is not significant. Cache updates for `owner_id` are
    /// spawned per success and not awaited.
    pub async fn refresh_all(
        &self,
        owner_id: i64,
        holdings: &[String],
        watchlist: &[String],
    ) -> Vec<Quote> {
        let codes: BTreeSet<String> = holdings.iter().chain(watchlist).cloned().collect();
        debug!(total = codes.len(), "starting batch refresh");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for code in codes {
            let reconciler = Arc::clone(&self.reconciler);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed while tasks hold it.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                match reconciler.reconcile(&code).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        debug!(code = %code, error = %e, "code skipped in batch refresh");
                        None
                    }
                }
            });
        }

        let mut quotes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(quote)) => {
                    self.spawn_cache_update(owner_id, &quote);
                    quotes.push(quote);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "refresh task failed to join"),
            }
        }

        debug!(resolved = quotes.len(), "batch refresh complete");
        quotes
    }

    /// Best-effort cache side-effect; failure is logged and otherwise ignored.
    fn spawn_cache_update(&self, owner_id: i64, quote: &Quote) {
        let cache = Arc::clone(&self.cache);
        let msg = quote.to_message();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = cache.update_cached_quote(
                owner_id,
                &msg.code,
                &msg.name,
                &msg.value,
                &msg.change_percent,
            ) {
                warn!(code = %msg.code, error = %e, "cached quote update failed");
            }
        });
    }
}
