//! Per-sport market-type and country-code filters, compiled once per sport.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Sport;

struct SportFilter {
    market_type: Lazy<Regex>,
    country_code: Lazy<Regex>,
}

static FOOTBALL: SportFilter = SportFilter {
    market_type: Lazy::new(|| Regex::new(r"(^MATCH_ODDS$)|(OVER)|(UNDER)|(_OU_)").unwrap()),
    country_code: Lazy::new(|| Regex::new(r".*").unwrap()),
};

static TENNIS: SportFilter = SportFilter {
    market_type: Lazy::new(|| Regex::new(r"^MATCH_ODDS$").unwrap()),
    country_code: Lazy::new(|| Regex::new(r".*").unwrap()),
};

static HORSERACING: SportFilter = SportFilter {
    market_type: Lazy::new(|| Regex::new(r"(^WIN$)|(^EACH_WAY$)").unwrap()),
    country_code: Lazy::new(|| Regex::new(r"(GB)|(IE)").unwrap()),
};

fn filter_for(sport: Sport) -> &'static SportFilter {
    match sport {
        Sport::Football => &FOOTBALL,
        Sport::Tennis => &TENNIS,
        Sport::Horseracing => &HORSERACING,
    }
}

/// Whether a market's type and country code should be processed for the
/// given sport. A missing market type or country code is treated as an
/// empty string against the sport's regex — this fails the anchored
/// market-type patterns but still passes a bare `.*` country filter.
pub fn market_matches(sport: Sport, market_type: Option<&str>, country_code: Option<&str>) -> bool {
    let filter = filter_for(sport);
    let type_ok = filter.market_type.is_match(market_type.unwrap_or(""));
    let country_ok = filter.country_code.is_match(country_code.unwrap_or(""));
    type_ok && country_ok
}
