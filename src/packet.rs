//! Wire format for one line of a Betfair-style market-change stream, and the
//! decoder that turns a raw line into a validated, timestamped packet.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LadderError, Result};

/// One price/size pair as carried on the wire, e.g. `[2.55, 100]`.
pub type PriceSizePair = (Decimal, Decimal);

/// Raw packet as it appears on the wire: one JSON object per line.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawPacket {
    /// Milliseconds since epoch. Absent is treated as malformed.
    pub pt: Option<i64>,
    #[serde(default)]
    pub mc: Vec<RawMarketChange>,
    /// Present on live-stream packets; stripped before the raw packet is
    /// persisted downstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMarketChange {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<Vec<RawRunnerChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "marketDefinition")]
    pub market_definition: Option<RawMarketDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRunnerChange {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atb: Option<Vec<PriceSizePair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atl: Option<Vec<PriceSizePair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trd: Option<Vec<PriceSizePair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltp: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRunnerDefinition {
    pub id: i64,
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsp: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMarketDefinition {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(default, rename = "marketType")]
    pub market_type: Option<String>,
    #[serde(default, rename = "countryCode")]
    pub country_code: Option<String>,
    pub name: String,
    #[serde(rename = "openDate")]
    pub open_date: String,
    #[serde(rename = "marketTime")]
    pub market_time: String,
    #[serde(rename = "suspendTime")]
    pub suspend_time: String,
    #[serde(rename = "inPlay")]
    pub in_play: bool,
    pub runners: Vec<RawRunnerDefinition>,
    /// Anything else the venue sends that this crate doesn't model explicitly
    /// is preserved so the metadata document round-trips faithfully.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A decoded, validated packet: `pt` parsed to UTC and exactly one market
/// change present.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub pt: DateTime<Utc>,
    pub market_change: RawMarketChange,
    /// The original line, parsed, for raw-packet rewriting (§4.3 step 8).
    pub raw: RawPacket,
}

/// Parses one line of the stream into a [`DecodedPacket`].
///
/// Rejects with [`LadderError::MalformedPacket`] if `pt` is missing, `mc` is
/// absent/empty, or `mc` carries more than one market change — handling
/// multiple markets in a single file is out of scope.
pub struct PacketDecoder;

impl PacketDecoder {
    pub fn decode(key: &str, line_no: usize, line: &str) -> Result<DecodedPacket> {
        let raw: RawPacket = serde_json::from_str(line)?;
        Self::decode_raw(key, line_no, raw)
    }

    pub fn decode_raw(key: &str, line_no: usize, raw: RawPacket) -> Result<DecodedPacket> {
        let pt_millis = raw.pt.ok_or_else(|| LadderError::MalformedPacket {
            key: key.to_string(),
            line: line_no,
            reason: "missing pt".to_string(),
        })?;

        if raw.mc.is_empty() {
            return Err(LadderError::MalformedPacket {
                key: key.to_string(),
                line: line_no,
                reason: "mc is missing or empty".to_string(),
            });
        }
        if raw.mc.len() != 1 {
            return Err(LadderError::MalformedPacket {
                key: key.to_string(),
                line: line_no,
                reason: format!("mc has {} entries, expected 1 (single-market files only)", raw.mc.len()),
            });
        }

        let pt = Utc
            .timestamp_millis_opt(pt_millis)
            .single()
            .ok_or_else(|| LadderError::MalformedPacket {
                key: key.to_string(),
                line: line_no,
                reason: format!("pt {pt_millis} is not a valid millisecond timestamp"),
            })?;

        let market_change = raw.mc[0].clone();
        Ok(DecodedPacket { pt, market_change, raw })
    }
}

/// Parses the three Betfair-format date strings (`"%Y-%m-%dT%H:%M:%S%.fZ"`)
/// carried in a market definition.
pub fn parse_betfair_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|e| LadderError::InvalidMarketDefinition(format!("bad date \"{s}\": {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_missing_pt() {
        let line = r#"{"mc":[{"id":"1.1"}]}"#;
        let err = PacketDecoder::decode("1.1.bz2", 1, line).unwrap_err();
        assert!(matches!(err, LadderError::MalformedPacket { .. }));
    }

    #[test]
    fn decode_rejects_empty_mc() {
        let line = r#"{"pt":1000,"mc":[]}"#;
        let err = PacketDecoder::decode("1.1.bz2", 1, line).unwrap_err();
        assert!(matches!(err, LadderError::MalformedPacket { .. }));
    }

    #[test]
    fn decode_rejects_multi_market_packet() {
        let line = r#"{"pt":1000,"mc":[{"id":"1.1"},{"id":"1.2"}]}"#;
        let err = PacketDecoder::decode("1.1.bz2", 1, line).unwrap_err();
        assert!(matches!(err, LadderError::MalformedPacket { .. }));
    }

    #[test]
    fn decode_accepts_single_runner_change() {
        let line = r#"{"pt":1000,"mc":[{"id":"1.1","rc":[{"id":10,"atb":[[2.5,100]]}]}]}"#;
        let decoded = PacketDecoder::decode("1.1.bz2", 1, line).unwrap();
        assert_eq!(decoded.pt.timestamp_millis(), 1000);
        assert_eq!(decoded.market_change.id, "1.1");
        let rc = decoded.market_change.rc.as_ref().unwrap();
        assert_eq!(rc[0].id, 10);
        assert_eq!(rc[0].atb.as_ref().unwrap()[0].0, Decimal::new(25, 1));
    }

    #[test]
    fn parse_betfair_datetime_handles_fractional_seconds() {
        let dt = parse_betfair_datetime("2023-01-03T13:00:00.000Z").unwrap();
        assert_eq!(dt.timestamp(), 1672750800);
    }
}
