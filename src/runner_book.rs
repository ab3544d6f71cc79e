//! Per-runner price-ladder state: available-to-back, available-to-lay,
//! traded-volume and the trades derived from it.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::packet::PriceSizePair;

/// Back/lay ladders are capped at this many price levels; the traded-volume
/// ladder is unbounded.
pub const LADDER_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "b")]
    Back,
    #[serde(rename = "l")]
    Lay,
    /// Neither ladder had a best price to compare against when the trade
    /// was inferred.
    #[serde(rename = "nan")]
    Unknown,
}

/// One inferred trade: `[price, traded-delta, side]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade(pub Decimal, pub Decimal, pub TradeSide);

/// Live state for one runner across the life of a market.
#[derive(Debug, Clone, Default)]
pub struct RunnerBook {
    /// Ascending by price; presented highest-first, capped to [`LADDER_DEPTH`].
    pub atb: BTreeMap<Decimal, Decimal>,
    /// Ascending by price; presented as-is, capped to [`LADDER_DEPTH`].
    pub atl: BTreeMap<Decimal, Decimal>,
    /// Ascending by price; cumulative traded volume per price, unbounded.
    pub trd: BTreeMap<Decimal, Decimal>,
    /// Trades inferred since the last snapshot was emitted.
    pub trades: Vec<Trade>,
    pub ltp: Option<Decimal>,
    pub tv: Option<Decimal>,
    /// Running total of traded volume, rounded to 2dp after each update.
    pub ttrdv: Decimal,
    /// Best back price, `0` if `atb` is empty.
    pub bbp: Decimal,
    /// Best lay price. `None` stands in for the "+infinity" sentinel used
    /// when `atl` is empty, so that no price compares at-or-above it.
    pub blp: Option<Decimal>,
}

impl RunnerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one runner-change in the mandated order: trade inference
    /// (using the ladder state as of the *previous* packet), then atb, atl,
    /// trd, ltp, tv.
    pub fn apply_change(
        &mut self,
        atb: Option<&[PriceSizePair]>,
        atl: Option<&[PriceSizePair]>,
        trd: Option<&[PriceSizePair]>,
        ltp: Option<Decimal>,
        tv: Option<Decimal>,
    ) {
        if let Some(trd) = trd {
            self.derive_trades(trd);
        }
        if let Some(atb) = atb {
            Self::merge_capped(&mut self.atb, atb, CapRule::KeepHighest);
        }
        if let Some(atl) = atl {
            Self::merge_capped(&mut self.atl, atl, CapRule::KeepLowest);
        }
        self.recompute_best_prices();

        if let Some(trd) = trd {
            Self::merge_uncapped(&mut self.trd, trd);
        }
        if let Some(ltp) = ltp {
            if ltp != Decimal::ZERO {
                self.ltp = Some(ltp);
            }
        }
        if let Some(tv) = tv {
            if tv != Decimal::ZERO {
                self.tv = Some(tv);
            }
        }
    }

    /// Inferred-trade derivation: for each `[price, cumulative_traded]` pair
    /// in the incoming `trd`, compare against the prior cumulative value at
    /// that price, using `bbp`/`blp` as they stood at the end of the
    /// previous packet. A non-positive delta is discarded as FX-revaluation
    /// noise rather than recorded as a trade.
    fn derive_trades(&mut self, trd_updates: &[PriceSizePair]) {
        for &(price, cumulative) in trd_updates {
            let prior = self.trd.get(&price).copied().unwrap_or(Decimal::ZERO);
            let delta = (cumulative - prior).round_dp(2);
            if delta <= Decimal::ZERO {
                continue;
            }
            let side = if price <= self.bbp {
                TradeSide::Back
            } else if self.blp.map(|blp| price >= blp).unwrap_or(false) {
                TradeSide::Lay
            } else {
                TradeSide::Unknown
            };
            self.trades.push(Trade(price, delta, side));
            self.ttrdv += delta;
        }
    }

    fn merge_capped(map: &mut BTreeMap<Decimal, Decimal>, updates: &[PriceSizePair], rule: CapRule) {
        for &(price, size) in updates {
            if size == Decimal::ZERO {
                map.remove(&price);
            } else {
                map.insert(price, size);
            }
        }
        match rule {
            CapRule::KeepHighest => {
                while map.len() > LADDER_DEPTH {
                    if let Some(&lowest) = map.keys().next() {
                        map.remove(&lowest);
                    }
                }
            }
            CapRule::KeepLowest => {
                while map.len() > LADDER_DEPTH {
                    if let Some(&highest) = map.keys().next_back() {
                        map.remove(&highest);
                    }
                }
            }
        }
    }

    fn merge_uncapped(map: &mut BTreeMap<Decimal, Decimal>, updates: &[PriceSizePair]) {
        for &(price, size) in updates {
            if size == Decimal::ZERO {
                map.remove(&price);
            } else {
                map.insert(price, size);
            }
        }
    }

    fn recompute_best_prices(&mut self) {
        self.bbp = self.atb.keys().next_back().copied().unwrap_or(Decimal::ZERO);
        self.blp = self.atl.keys().next().copied();
    }

    /// Clears the trades accumulated since the last snapshot. Called once a
    /// snapshot carrying them has been emitted.
    pub fn reset_trades(&mut self) {
        self.trades.clear();
    }

    /// `atb` presented highest-price-first, capped view (already capped on write).
    pub fn atb_descending(&self) -> Vec<(Decimal, Decimal)> {
        self.atb.iter().rev().map(|(&p, &s)| (p, s)).collect()
    }

    pub fn atl_ascending(&self) -> Vec<(Decimal, Decimal)> {
        self.atl.iter().map(|(&p, &s)| (p, s)).collect()
    }

    pub fn trd_ascending(&self) -> Vec<(Decimal, Decimal)> {
        self.trd.iter().map(|(&p, &s)| (p, s)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum CapRule {
    KeepHighest,
    KeepLowest,
}
