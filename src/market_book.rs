//! Aggregates one [`RunnerBook`] per runner and applies incoming market
//! changes to all of them.

use std::collections::BTreeMap;

use tracing::warn;

use crate::packet::RawMarketChange;
use crate::runner_book::RunnerBook;

#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    pub runners: BTreeMap<i64, RunnerBook>,
}

impl MarketBook {
    /// Runner ids are fixed at construction time from the first-seen market
    /// definition. Runner changes for ids outside this set are ignored —
    /// the source behaves the same way when a later update references a
    /// runner id that wasn't present in the definition used to build the
    /// ladder structure.
    pub fn new(runner_ids: &[i64]) -> Self {
        Self {
            runners: runner_ids.iter().map(|&id| (id, RunnerBook::new())).collect(),
        }
    }

    pub fn apply_market_change(&mut self, market_change: &RawMarketChange) {
        let Some(runner_changes) = &market_change.rc else {
            return;
        };
        for rc in runner_changes {
            let Some(book) = self.runners.get_mut(&rc.id) else {
                warn!(runner_id = rc.id, market_id = %market_change.id, "ignoring change for unknown runner");
                continue;
            };
            book.apply_change(
                rc.atb.as_deref(),
                rc.atl.as_deref(),
                rc.trd.as_deref(),
                rc.ltp,
                rc.tv,
            );
        }
    }

    /// Logs (never raises) any runner whose best back price currently
    /// crosses its best lay price.
    pub fn log_arbitrage(&self, market_id: &str, pt: chrono::DateTime<chrono::Utc>) {
        for (&runner_id, book) in &self.runners {
            let crossed = match book.blp {
                Some(blp) => book.bbp > blp,
                None => false,
            };
            if crossed {
                warn!(
                    market_id,
                    runner_id,
                    bbp = %book.bbp,
                    blp = ?book.blp,
                    pt = %pt,
                    "arbitrage opportunity detected"
                );
            }
        }
    }

    pub fn reset_trades(&mut self) {
        for book in self.runners.values_mut() {
            book.reset_trades();
        }
    }
}
