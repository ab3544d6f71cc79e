//! Orchestrates one file's worth of packets end to end: decode, update the
//! ladder, format snapshots, build metadata, and rewrite the raw packets for
//! persistence.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::Sport;
use crate::error::{LadderError, Result};
use crate::market_book::MarketBook;
use crate::market_definition::{extract_first_market_definition, MarketDefinition};
use crate::metadata::{MetadataBuilder, MetadataDocument, SportHook};
use crate::packet::{DecodedPacket, PacketDecoder};
use crate::snapshot::{LadderSnapshot, RunnerSnapshot};

pub struct BuildOutput {
    pub metadata: MetadataDocument,
    pub ladders: Vec<LadderSnapshot>,
    /// The raw packets with `pt`/`metadata` set and `clk`/`op` stripped,
    /// ready for the raw-marketdata collection.
    pub raw_packets: Vec<serde_json::Value>,
}

pub struct LadderBuilder;

impl LadderBuilder {
    /// Decodes every line of a file up front (mirroring the source, which
    /// processes a fully-loaded `marketdata` list rather than a true
    /// line-by-line stream) then runs the full per-packet pipeline.
    pub fn build(key: &str, sport: Sport, lines: &[String]) -> Result<BuildOutput> {
        if lines.is_empty() {
            return Err(LadderError::EmptyFile(key.to_string()));
        }

        let decoded: Vec<DecodedPacket> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| PacketDecoder::decode(key, i + 1, line))
            .collect::<Result<_>>()?;

        let market_changes: Vec<&crate::packet::RawMarketChange> =
            decoded.iter().map(|d| &d.market_change).collect();
        let first_market_definition = extract_first_market_definition(&market_changes)?;
        let runner_ids: Vec<i64> = first_market_definition.runners.iter().map(|r| r.id).collect();

        let in_play_start = decoded
            .iter()
            .find(|d| d.market_change.market_definition.as_ref().is_some_and(|md| md.in_play))
            .map(|d| d.pt);
        let in_play_end = decoded.last().map(|d| d.pt);

        let last_decoded = decoded
            .last()
            .ok_or_else(|| LadderError::EmptyFile(key.to_string()))?;
        let last_market_change = &last_decoded.market_change;
        let last_market_definition_raw = last_market_change
            .market_definition
            .clone()
            .ok_or_else(|| LadderError::InvalidMarketDefinition("last packet has no marketDefinition".to_string()))?;
        let last_market_definition = MarketDefinition::from_raw(&last_market_definition_raw)?;

        let hook = SportHook::from(sport);
        let mut metadata_builder = MetadataBuilder::new(
            hook,
            last_market_change.id.clone(),
            last_market_definition,
            in_play_start,
            in_play_end,
        );
        let market_id = metadata_builder.market_id().to_string();

        let mut market_book = MarketBook::new(&runner_ids);
        let mut current_market_definition: Option<MarketDefinition> = None;
        let mut ladders = Vec::with_capacity(decoded.len());
        let mut raw_packets = Vec::with_capacity(decoded.len());

        for decoded_packet in &decoded {
            market_book.apply_market_change(&decoded_packet.market_change);

            if let Some(raw_md) = &decoded_packet.market_change.market_definition {
                current_market_definition = Some(MarketDefinition::from_raw(raw_md)?);
            }

            let snapshot = Self::format_snapshot(
                decoded_packet.pt,
                &market_id,
                &market_book,
                current_market_definition.clone(),
            );

            market_book.log_arbitrage(&market_id, decoded_packet.pt);
            metadata_builder.extend_pre_market(&snapshot, decoded_packet.pt);
            ladders.push(snapshot);
            market_book.reset_trades();

            raw_packets.push(Self::rewrite_raw_packet(decoded_packet, &market_id));
        }

        metadata_builder.extend_post_market();

        Ok(BuildOutput {
            metadata: metadata_builder.finish(),
            ladders,
            raw_packets,
        })
    }

    fn format_snapshot(
        pt: DateTime<Utc>,
        market_id: &str,
        market_book: &MarketBook,
        market_definition: Option<MarketDefinition>,
    ) -> LadderSnapshot {
        let runners = market_book
            .runners
            .iter()
            .map(|(&id, book)| (id, RunnerSnapshot::from_book(book)))
            .collect();

        LadderSnapshot {
            pt,
            metadata: market_id.to_string(),
            runners,
            market_definition,
        }
    }

    fn rewrite_raw_packet(decoded: &DecodedPacket, market_id: &str) -> serde_json::Value {
        let mut value = serde_json::to_value(&decoded.raw).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("pt".to_string(), json!(decoded.pt));
            obj.insert("metadata".to_string(), json!(market_id));
            obj.remove("clk");
            obj.remove("op");
        }
        value
    }
}
