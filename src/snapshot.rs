//! Per-packet ladder snapshot formatting: the document shape persisted to
//! the ladder time-series collection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::market_definition::MarketDefinition;
use crate::runner_book::{RunnerBook, Trade};

/// One runner's ladder as it is persisted: only fields that are truthy in
/// the source (non-empty ladders, non-zero scalars, non-empty trade lists)
/// are present, matching the "missing fields are handled better than null"
/// convention the original document store relies on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerSnapshot {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub atb: Vec<(Decimal, Decimal)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub atl: Vec<(Decimal, Decimal)>,
    /// String-keyed so it survives document stores whose map keys must be
    /// strings (e.g. Mongo's BSON, or Postgres JSONB object keys).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub trd: BTreeMap<String, Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltp: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv: Option<Decimal>,
    #[serde(skip_serializing_if = "Decimal::is_zero")]
    pub ttrdv: Decimal,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<Trade>,
}

impl RunnerSnapshot {
    pub fn from_book(book: &RunnerBook) -> Self {
        Self {
            atb: book.atb_descending(),
            atl: book.atl_ascending(),
            trd: book.trd_ascending().into_iter().map(|(p, v)| (p.to_string(), v)).collect(),
            ltp: book.ltp,
            tv: book.tv,
            ttrdv: book.ttrdv,
            trades: book.trades.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LadderSnapshot {
    pub pt: DateTime<Utc>,
    /// The owning market's id, used as the document's logical partition key.
    pub metadata: String,
    pub runners: BTreeMap<i64, RunnerSnapshot>,
    #[serde(rename = "marketDefinition", skip_serializing_if = "Option::is_none")]
    pub market_definition: Option<MarketDefinition>,
}
