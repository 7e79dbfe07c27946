//! Fire-and-forget cache warming for neighbouring months.

use tokio::task::JoinHandle;

use crate::fetcher::ReleaseFetcher;
use crate::month::YearMonth;

impl ReleaseFetcher {
    /// Load `month` in the background. Failures are logged, never returned.
    ///
    /// The handle may be dropped; the load keeps running.
    pub fn prefetch(&self, month: YearMonth) -> JoinHandle<()> {
        let fetcher = self.clone();
        tokio::spawn(async move {
            match fetcher.fetch_month(month).await {
                Ok(list) => tracing::debug!(%month, count = list.len(), "prefetched month"),
                Err(e) => tracing::warn!(%month, error = %e, "prefetch failed"),
            }
        })
    }

    /// Warm the months before and after `month`.
    pub fn prefetch_adjacent(&self, month: YearMonth) -> [JoinHandle<()>; 2] {
        [self.prefetch(month.prev()), self.prefetch(month.next())]
    }
}
