//! Metadata document construction: the market definition enriched with
//! in-play timing, pre-in-play ladder captures, and post-market winner,
//! favourite, and sport-specific fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::Sport;
use crate::market_definition::MarketDefinition;
use crate::snapshot::{LadderSnapshot, RunnerSnapshot};

/// Markets never reach in-play within this many milliseconds of it are
/// captured as the corresponding pre-in-play ladder.
const PRE0_THRESHOLD_MS: i64 = 1_000;
const PRE5_THRESHOLD_MS: i64 = 5 * 60 * 1_000;
const PRE10_THRESHOLD_MS: i64 = 10 * 60 * 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct WinnerInfo {
    pub name: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bsp: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavouriteInfo {
    pub name: String,
    pub id: i64,
    pub bsp: Decimal,
}

/// Only the runner-id → runner-ladder mapping of a [`LadderSnapshot`] — the
/// source captures `copy.deepcopy(self.pre0ladder["runners"])`, not the
/// whole snapshot wrapper.
pub type PreInPlayLadder = BTreeMap<i64, RunnerSnapshot>;

/// Sport-specific metadata extension, grounded on the `HorseRacingMetadataBuilder`
/// / `FootballMetadataBuilder` / `TennisMetadataBuilder` split: the base builder
/// is shared, and only horse racing adds anything here.
#[derive(Debug, Clone, Copy)]
pub enum SportHook {
    Football,
    Tennis,
    HorseRacing,
}

impl From<Sport> for SportHook {
    fn from(sport: Sport) -> Self {
        match sport {
            Sport::Football => SportHook::Football,
            Sport::Tennis => SportHook::Tennis,
            Sport::Horseracing => SportHook::HorseRacing,
        }
    }
}

static DISTANCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+m\d*f|\d+m|\d+f)").unwrap());

impl SportHook {
    /// Extends the metadata's race-type/distance/handicap fields. Only
    /// horse racing WIN markets get anything written.
    fn extend_post_market(&self, market_definition: &MarketDefinition, metadata: &mut MetadataDocument) {
        let SportHook::HorseRacing = self else { return };
        if market_definition.market_type.as_deref() != Some("WIN") {
            return;
        }
        let name = &market_definition.name;
        metadata.race_type_adjusted = Some(Self::extract_race_type_adjusted(name));
        metadata.distance = Self::extract_distance(name);
        metadata.is_handicap = Some(name.contains("Hcap") || name.contains("Handicap"));
    }

    fn extract_race_type_adjusted(name: &str) -> String {
        if name.contains("Hrd") || name.contains("Hurdle") {
            "Hurdle".to_string()
        } else if name.contains("Chs") || name.contains("Chase") {
            "Chase".to_string()
        } else if name.contains("INHF") {
            "NH Flat".to_string()
        } else {
            "Flat".to_string()
        }
    }

    fn extract_distance(name: &str) -> Option<String> {
        DISTANCE_RE.find(name).map(|m| m.as_str().to_string())
    }
}

/// The metadata document for one market: market definition plus everything
/// the builder accumulates over the life of the market.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "marketId")]
    pub market_id: String,
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "marketDefinition")]
    pub market_definition: MarketDefinition,
    #[serde(rename = "inPlayStartTime")]
    pub in_play_start_time: Option<DateTime<Utc>>,
    #[serde(rename = "inPlayEndTime")]
    pub in_play_end_time: Option<DateTime<Utc>>,
    #[serde(rename = "pre0ladder", skip_serializing_if = "Option::is_none")]
    pub pre0_ladder: Option<PreInPlayLadder>,
    #[serde(rename = "pre5ladder", skip_serializing_if = "Option::is_none")]
    pub pre5_ladder: Option<PreInPlayLadder>,
    #[serde(rename = "pre10ladder", skip_serializing_if = "Option::is_none")]
    pub pre10_ladder: Option<PreInPlayLadder>,
    #[serde(rename = "winnerInfo", skip_serializing_if = "Option::is_none")]
    pub winner_info: Option<WinnerInfo>,
    #[serde(rename = "favouriteInfo", skip_serializing_if = "Option::is_none")]
    pub favourite_info: Option<Vec<FavouriteInfo>>,
    #[serde(rename = "raceTypeAdjusted", skip_serializing_if = "Option::is_none")]
    pub race_type_adjusted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<String>,
    #[serde(rename = "isHandicap", skip_serializing_if = "Option::is_none")]
    pub is_handicap: Option<bool>,
}

pub struct MetadataBuilder {
    hook: SportHook,
    in_play_start: Option<DateTime<Utc>>,
    document: MetadataDocument,
}

impl MetadataBuilder {
    /// Built from the last packet's market definition (carrying the final
    /// runner statuses/BSPs) plus the in-play window detected over the
    /// whole file. `market_id` is the owning market change's id (e.g.
    /// `"1.12345"`), not part of the market definition itself.
    pub fn new(
        hook: SportHook,
        market_id: String,
        market_definition: MarketDefinition,
        in_play_start: Option<DateTime<Utc>>,
        in_play_end: Option<DateTime<Utc>>,
    ) -> Self {
        let event_id = market_definition.event_id.clone();
        let id = format!("metadata_{market_id}_{event_id}");
        Self {
            hook,
            in_play_start,
            document: MetadataDocument {
                id,
                market_id,
                event_id,
                market_definition,
                in_play_start_time: in_play_start,
                in_play_end_time: in_play_end,
                pre0_ladder: None,
                pre5_ladder: None,
                pre10_ladder: None,
                winner_info: None,
                favourite_info: None,
                race_type_adjusted: None,
                distance: None,
                is_handicap: None,
            },
        }
    }

    pub fn market_id(&self) -> &str {
        &self.document.market_id
    }

    /// Captures the pre-in-play ladders the first time each threshold is
    /// crossed. Each field is immutable once set — later packets that also
    /// qualify are ignored, so the earliest qualifying packet wins. A market
    /// that never goes in-play never gets any of these fields.
    pub fn extend_pre_market(&mut self, snapshot: &LadderSnapshot, pt: DateTime<Utc>) {
        let Some(in_play_start) = self.in_play_start else { return };
        let millis_to_in_play = (in_play_start - pt).num_milliseconds();

        if self.document.pre0_ladder.is_none() && millis_to_in_play < PRE0_THRESHOLD_MS {
            self.document.pre0_ladder = Some(snapshot.runners.clone());
        }
        if self.document.pre5_ladder.is_none() && millis_to_in_play < PRE5_THRESHOLD_MS {
            self.document.pre5_ladder = Some(snapshot.runners.clone());
        }
        if self.document.pre10_ladder.is_none() && millis_to_in_play < PRE10_THRESHOLD_MS {
            self.document.pre10_ladder = Some(snapshot.runners.clone());
        }
    }

    /// Extends the metadata with winner/favourite info (common to all
    /// sports) and then the sport-specific hook.
    pub fn extend_post_market(&mut self) {
        let runners = &self.document.market_definition.runners;

        let winner = runners.iter().find(|r| r.status == "WINNER").map(|r| WinnerInfo {
            name: r.name.clone(),
            id: r.id,
            bsp: r.bsp,
        });
        self.document.winner_info = winner;

        let mut favourites: Vec<FavouriteInfo> = runners
            .iter()
            .filter_map(|r| {
                r.bsp.filter(|bsp| !bsp.is_zero()).map(|bsp| FavouriteInfo {
                    name: r.name.clone(),
                    id: r.id,
                    bsp,
                })
            })
            .collect();
        favourites.sort_by(|a, b| a.bsp.cmp(&b.bsp));
        if !favourites.is_empty() {
            self.document.favourite_info = Some(favourites);
        }

        let market_definition = self.document.market_definition.clone();
        self.hook.extend_post_market(&market_definition, &mut self.document);
    }

    pub fn finish(self) -> MetadataDocument {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{RawMarketDefinition, RawRunnerDefinition};
    use rust_decimal_macros::dec;

    fn market_definition(name: &str, market_type: &str) -> MarketDefinition {
        let raw = RawMarketDefinition {
            event_id: "evt1".to_string(),
            market_type: Some(market_type.to_string()),
            country_code: Some("GB".to_string()),
            name: name.to_string(),
            open_date: "2023-01-03T12:00:00.000Z".to_string(),
            market_time: "2023-01-03T13:00:00.000Z".to_string(),
            suspend_time: "2023-01-03T13:00:00.000Z".to_string(),
            in_play: false,
            runners: vec![
                RawRunnerDefinition {
                    id: 1,
                    name: "Favourite".to_string(),
                    status: "WINNER".to_string(),
                    bsp: Some(dec!(2.0)),
                },
                RawRunnerDefinition {
                    id: 2,
                    name: "Outsider".to_string(),
                    status: "LOSER".to_string(),
                    bsp: Some(dec!(8.0)),
                },
            ],
            extra: Default::default(),
        };
        MarketDefinition::from_raw(&raw).unwrap()
    }

    #[test]
    fn horse_racing_win_market_extracts_race_type_distance_and_handicap() {
        let md = market_definition("2m4f Hcap Hrd", "WIN");
        let mut builder = MetadataBuilder::new(SportHook::HorseRacing, "1.1".to_string(), md, None, None);
        builder.extend_post_market();
        let doc = builder.finish();
        assert_eq!(doc.race_type_adjusted.as_deref(), Some("Hurdle"));
        assert_eq!(doc.distance.as_deref(), Some("2m4f"));
        assert_eq!(doc.is_handicap, Some(true));
    }

    #[test]
    fn horse_racing_hook_skips_non_win_markets() {
        let md = market_definition("2m4f Hcap Hrd", "EACH_WAY");
        let mut builder = MetadataBuilder::new(SportHook::HorseRacing, "1.1".to_string(), md, None, None);
        builder.extend_post_market();
        let doc = builder.finish();
        assert!(doc.race_type_adjusted.is_none());
    }

    #[test]
    fn football_hook_never_extends_race_fields() {
        let md = market_definition("Team A vs Team B", "MATCH_ODDS");
        let mut builder = MetadataBuilder::new(SportHook::Football, "1.1".to_string(), md, None, None);
        builder.extend_post_market();
        assert!(builder.finish().distance.is_none());
    }

    #[test]
    fn winner_and_favourites_extracted_from_runners() {
        let md = market_definition("Race", "WIN");
        let mut builder = MetadataBuilder::new(SportHook::HorseRacing, "1.1".to_string(), md, None, None);
        builder.extend_post_market();
        let doc = builder.finish();
        assert_eq!(doc.winner_info.unwrap().id, 1);
        let favs = doc.favourite_info.unwrap();
        assert_eq!(favs[0].id, 1);
        assert_eq!(favs[1].id, 2);
    }

    #[test]
    fn pre_in_play_fields_are_immutable_once_set() {
        let md = market_definition("Race", "WIN");
        let in_play_start = DateTime::parse_from_rfc3339("2023-01-03T13:00:00Z").unwrap().with_timezone(&Utc);
        let mut builder = MetadataBuilder::new(SportHook::HorseRacing, "1.1".to_string(), md, Some(in_play_start), Some(in_play_start));

        let mut runners_early = BTreeMap::new();
        runners_early.insert(1, RunnerSnapshot { ltp: Some(dec!(2.5)), ..Default::default() });
        let snapshot_early = LadderSnapshot {
            pt: in_play_start - chrono::Duration::milliseconds(590_000),
            metadata: "1.1".to_string(),
            runners: runners_early.clone(),
            market_definition: None,
        };
        builder.extend_pre_market(&snapshot_early, snapshot_early.pt);
        assert!(builder.document.pre10_ladder.is_some());
        assert!(builder.document.pre5_ladder.is_none());

        let mut runners_late = BTreeMap::new();
        runners_late.insert(1, RunnerSnapshot { ltp: Some(dec!(3.0)), ..Default::default() });
        let snapshot_late = LadderSnapshot {
            pt: in_play_start - chrono::Duration::milliseconds(250_000),
            metadata: "1.1".to_string(),
            runners: runners_late,
            market_definition: None,
        };
        builder.extend_pre_market(&snapshot_late, snapshot_late.pt);
        assert!(builder.document.pre5_ladder.is_some());

        let pre10 = builder.document.pre10_ladder.as_ref().unwrap();
        assert_eq!(pre10[&1].ltp, runners_early[&1].ltp);
    }
}
