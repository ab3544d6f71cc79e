//! Normalized market definition carried alongside the ladder snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::Sport;
use crate::error::{LadderError, Result};
use crate::packet::{parse_betfair_datetime, RawMarketDefinition};

#[derive(Debug, Clone, Serialize)]
pub struct RunnerDefinition {
    pub id: i64,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsp: Option<Decimal>,
}

/// A market definition with Betfair's date strings parsed to UTC timestamps,
/// mirroring the source's in-place conversion during metadata formatting.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDefinition {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "marketType", skip_serializing_if = "Option::is_none")]
    pub market_type: Option<String>,
    #[serde(rename = "countryCode", skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    pub name: String,
    #[serde(rename = "openDate")]
    pub open_date: DateTime<Utc>,
    #[serde(rename = "marketTime")]
    pub market_time: DateTime<Utc>,
    #[serde(rename = "suspendTime")]
    pub suspend_time: DateTime<Utc>,
    #[serde(rename = "inPlay")]
    pub in_play: bool,
    pub runners: Vec<RunnerDefinition>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MarketDefinition {
    pub fn from_raw(raw: &RawMarketDefinition) -> Result<Self> {
        Ok(Self {
            event_id: raw.event_id.clone(),
            market_type: raw.market_type.clone(),
            country_code: raw.country_code.clone(),
            name: raw.name.clone(),
            open_date: parse_betfair_datetime(&raw.open_date)?,
            market_time: parse_betfair_datetime(&raw.market_time)?,
            suspend_time: parse_betfair_datetime(&raw.suspend_time)?,
            in_play: raw.in_play,
            runners: raw
                .runners
                .iter()
                .map(|r| RunnerDefinition {
                    id: r.id,
                    name: r.name.clone(),
                    status: r.status.clone(),
                    bsp: r.bsp,
                })
                .collect(),
            extra: raw.extra.clone(),
        })
    }

    pub fn runner_ids(&self) -> Vec<i64> {
        self.runners.iter().map(|r| r.id).collect()
    }

    /// True when the market's name/country/type should be kept for the given
    /// sport, per that sport's configured filters.
    pub fn matches_filters(&self, sport: Sport) -> bool {
        crate::filters::market_matches(sport, self.market_type.as_deref(), self.country_code.as_deref())
    }
}

/// Extracts the market definition from the file's first packet, which every
/// valid single-market file is expected to carry on its opening line.
pub fn extract_first_market_definition(
    raw_market_changes: &[&crate::packet::RawMarketChange],
) -> Result<RawMarketDefinition> {
    raw_market_changes
        .first()
        .and_then(|mc| mc.market_definition.clone())
        .ok_or_else(|| LadderError::InvalidMarketDefinition("first packet has no marketDefinition".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RawRunnerDefinition;

    fn raw() -> RawMarketDefinition {
        RawMarketDefinition {
            event_id: "evt1".to_string(),
            market_type: Some("WIN".to_string()),
            country_code: Some("GB".to_string()),
            name: "2m4f Hcap Hrd".to_string(),
            open_date: "2023-01-03T12:00:00.000Z".to_string(),
            market_time: "2023-01-03T13:00:00.000Z".to_string(),
            suspend_time: "2023-01-03T13:00:00.000Z".to_string(),
            in_play: false,
            runners: vec![RawRunnerDefinition {
                id: 1,
                name: "Runner One".to_string(),
                status: "ACTIVE".to_string(),
                bsp: None,
            }],
            extra: Default::default(),
        }
    }

    #[test]
    fn from_raw_parses_dates_and_keeps_runners() {
        let md = MarketDefinition::from_raw(&raw()).unwrap();
        assert_eq!(md.runner_ids(), vec![1]);
        assert_eq!(md.market_time.timestamp(), 1672750800);
    }
}
