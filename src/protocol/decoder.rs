//! Decoders for oracle answer payloads
//!
//! All integers are little-endian. Offsets are fixed by the node's
//! in-memory layout and must not drift.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RESP_QUERY_DATA, RESP_QUERY_IDS, RESP_QUERY_METADATA, RESP_REPLY_DATA, RESP_TICK_RANGE};
use crate::error::{OracleError, Result};
use crate::types::{PairKey, QueryStatus, TickInfo};

pub const METADATA_SIZE: usize = 72;
pub const QUERY_DATA_SIZE: usize = 104;
pub const REPLY_PRICE_SIZE: usize = 16;
pub const TICK_INFO_SIZE: usize = 16;
const PAIR_FIELD_SIZE: usize = 32;

pub type OracleQueryId = i64;

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn le_i64(b: &[u8], at: usize) -> i64 {
    le_u64(b, at) as i64
}

/// Per-query metadata block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub query_id: OracleQueryId,
    pub query_type: u8,
    pub status: QueryStatus,
    pub status_flags: u16,
    pub query_tick: u32,
    pub timeout: u64,
    pub interface_index: u32,
    pub subscription_id: u32,
    pub reveal_tick: u32,
    pub total_commits: u16,
    pub agreeing_commits: u16,
}

impl QueryMetadata {
    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < METADATA_SIZE {
            return Err(OracleError::Decode(format!(
                "metadata needs {} bytes, got {}",
                METADATA_SIZE,
                b.len()
            )));
        }
        Ok(Self {
            query_id: le_i64(b, 0),
            query_type: b[8],
            status: QueryStatus::from_byte(b[9]),
            status_flags: le_u16(b, 10),
            query_tick: le_u32(b, 12),
            // [16:48] querying entity, not needed here
            timeout: le_u64(b, 48),
            interface_index: le_u32(b, 56),
            subscription_id: le_u32(b, 60),
            reveal_tick: le_u32(b, 64),
            total_commits: le_u16(b, 68),
            agreeing_commits: le_u16(b, 70),
        })
    }
}

/// The priced pair as stored in a query's data buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSpec {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
}

impl PairSpec {
    /// Fields live at `[0:32]`, `[40:72]` and `[72:104]`; `[32:40]` is reserved.
    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < QUERY_DATA_SIZE {
            return Err(OracleError::Decode(format!(
                "query data needs {} bytes, got {}",
                QUERY_DATA_SIZE,
                b.len()
            )));
        }
        Ok(Self {
            oracle: nul_padded(&b[0..PAIR_FIELD_SIZE]),
            currency1: nul_padded(&b[40..40 + PAIR_FIELD_SIZE]),
            currency2: nul_padded(&b[72..72 + PAIR_FIELD_SIZE]),
        })
    }

    pub fn key(&self) -> PairKey {
        PairKey {
            oracle: self.oracle.clone(),
            currency1: self.currency1.clone(),
            currency2: self.currency2.clone(),
        }
    }
}

fn nul_padded(field: &[u8]) -> String {
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Rational price reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPrice {
    pub numerator: i64,
    pub denominator: i64,
}

impl ReplyPrice {
    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < REPLY_PRICE_SIZE {
            return Err(OracleError::Decode(format!(
                "reply needs {} bytes, got {}",
                REPLY_PRICE_SIZE,
                b.len()
            )));
        }
        Ok(Self {
            numerator: le_i64(b, 0),
            denominator: le_i64(b, 8),
        })
    }

    /// `None` when the denominator is zero
    pub fn price(&self) -> Option<f64> {
        if self.denominator == 0 {
            None
        } else {
            Some(self.numerator as f64 / self.denominator as f64)
        }
    }
}

/// `RESPOND_CURRENT_TICK_INFO` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTickInfo {
    pub tick_duration: u16,
    pub epoch: u16,
    pub tick: u32,
    pub aligned_votes: u16,
    pub misaligned_votes: u16,
    pub initial_tick: u32,
}

impl CurrentTickInfo {
    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < TICK_INFO_SIZE {
            return Err(OracleError::Decode(format!(
                "tick info needs {} bytes, got {}",
                TICK_INFO_SIZE,
                b.len()
            )));
        }
        Ok(Self {
            tick_duration: le_u16(b, 0),
            epoch: le_u16(b, 2),
            tick: le_u32(b, 4),
            aligned_votes: le_u16(b, 8),
            misaligned_votes: le_u16(b, 10),
            initial_tick: le_u32(b, 12),
        })
    }

    pub fn tick_info(&self) -> TickInfo {
        TickInfo {
            tick: self.tick,
            epoch: self.epoch,
        }
    }
}

/// Ordered 8-byte ids; a trailing partial id is ignored.
pub fn decode_query_ids(b: &[u8]) -> Vec<OracleQueryId> {
    if b.len() % 8 != 0 {
        debug!(len = b.len(), "query id payload is not a multiple of 8");
    }
    b.chunks_exact(8).map(|c| le_i64(c, 0)).collect()
}

/// Everything known about one query after a full answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    pub metadata: Option<QueryMetadata>,
    pub status: QueryStatus,
    pub pair: Option<PairSpec>,
    pub reply: Option<ReplyPrice>,
    pub price: Option<f64>,
}

/// Collects the chunks of one logical answer until `END_RESPONSE`.
///
/// Query data and reply chunks are concatenated across frames; a value may
/// be split at any byte.
#[derive(Debug, Default)]
pub struct AnswerAccumulator {
    ids: Vec<u8>,
    metadata: Vec<u8>,
    query_data: Vec<u8>,
    reply_data: Vec<u8>,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: u32, chunk: &[u8]) {
        match tag {
            RESP_QUERY_IDS => self.ids.extend_from_slice(chunk),
            RESP_QUERY_METADATA => {
                if self.metadata.len() < METADATA_SIZE {
                    self.metadata.extend_from_slice(chunk);
                }
            }
            RESP_QUERY_DATA => self.query_data.extend_from_slice(chunk),
            RESP_REPLY_DATA => self.reply_data.extend_from_slice(chunk),
            RESP_TICK_RANGE => debug!(len = chunk.len(), "ignoring tick range chunk"),
            other => debug!(tag = other, len = chunk.len(), "ignoring unknown oracle chunk"),
        }
    }

    pub fn query_ids(&self) -> Vec<OracleQueryId> {
        decode_query_ids(&self.ids)
    }

    /// Missing or short pieces yield `None` fields rather than an error.
    pub fn query_info(&self) -> QueryInfo {
        let metadata = QueryMetadata::decode(&self.metadata).ok();
        let pair = PairSpec::decode(&self.query_data).ok();
        let reply = ReplyPrice::decode(&self.reply_data).ok();
        QueryInfo {
            status: metadata
                .as_ref()
                .map(|m| m.status)
                .unwrap_or(QueryStatus::Unknown),
            price: reply.and_then(|r| r.price()),
            metadata,
            pair,
            reply,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_bytes::*;
    use super::*;

    #[test]
    fn zero_reply_has_no_price() {
        let reply = ReplyPrice::decode(&[0u8; 16]).unwrap();
        assert_eq!(reply.price(), None);
    }

    #[test]
    fn half_reply_is_point_five() {
        let reply = ReplyPrice::decode(&reply_bytes(1, 2)).unwrap();
        assert_eq!(reply.price(), Some(0.5));
    }

    #[test]
    fn pair_decodes_nul_padded_fields() {
        let mut b = pair_bytes("BINANCE", "BTC", "USD");
        // reserved bytes must not leak into any field
        b[32..40].copy_from_slice(&[0xFF; 8]);
        let pair = PairSpec::decode(&b).unwrap();
        assert_eq!(
            pair,
            PairSpec {
                oracle: "BINANCE".into(),
                currency1: "BTC".into(),
                currency2: "USD".into(),
            }
        );
    }

    #[test]
    fn full_width_field_without_nul() {
        let name = "A".repeat(32);
        let pair = PairSpec::decode(&pair_bytes(&name, "X", "Y")).unwrap();
        assert_eq!(pair.oracle, name);
    }

    #[test]
    fn short_buffers_are_decode_errors() {
        assert!(PairSpec::decode(&[0u8; 103]).is_err());
        assert!(ReplyPrice::decode(&[0u8; 15]).is_err());
        assert!(QueryMetadata::decode(&[0u8; 71]).is_err());
    }

    #[test]
    fn metadata_reads_fixed_offsets() {
        let mut b = metadata_bytes(-42, 3, 1000);
        b[10..12].copy_from_slice(&0x0102u16.to_le_bytes());
        b[48..56].copy_from_slice(&99u64.to_le_bytes());
        let m = QueryMetadata::decode(&b).unwrap();
        assert_eq!(m.query_id, -42);
        assert_eq!(m.status, QueryStatus::Success);
        assert_eq!(m.status_flags, 0x0102);
        assert_eq!(m.query_tick, 1000);
        assert_eq!(m.reveal_tick, 1003);
        assert_eq!(m.timeout, 99);
        assert_eq!(m.total_commits, 676);
        assert_eq!(m.agreeing_commits, 451);
    }

    #[test]
    fn tick_info_layout() {
        let mut b = vec![0u8; 16];
        b[0..2].copy_from_slice(&1000u16.to_le_bytes());
        b[2..4].copy_from_slice(&171u16.to_le_bytes());
        b[4..8].copy_from_slice(&22_000_123u32.to_le_bytes());
        b[12..16].copy_from_slice(&22_000_000u32.to_le_bytes());
        let info = CurrentTickInfo::decode(&b).unwrap();
        assert_eq!(info.epoch, 171);
        assert_eq!(info.tick, 22_000_123);
        assert_eq!(info.initial_tick, 22_000_000);
    }

    #[test]
    fn split_chunks_are_concatenated_not_overwritten() {
        let pair = pair_bytes("X", "A", "B");
        let reply = reply_bytes(3, 1);
        let mut acc = AnswerAccumulator::new();
        acc.push(RESP_QUERY_METADATA, &metadata_bytes(5, 3, 100));
        acc.push(RESP_QUERY_DATA, &pair[..50]);
        acc.push(RESP_REPLY_DATA, &reply[..7]);
        acc.push(RESP_QUERY_DATA, &pair[50..]);
        acc.push(RESP_REPLY_DATA, &reply[7..]);

        let info = acc.query_info();
        assert_eq!(info.status, QueryStatus::Success);
        assert_eq!(info.pair.unwrap().oracle, "X");
        assert_eq!(info.price, Some(3.0));
    }

    #[test]
    fn missing_reply_yields_none_not_error() {
        let mut acc = AnswerAccumulator::new();
        acc.push(RESP_QUERY_METADATA, &metadata_bytes(5, 1, 100));
        let info = acc.query_info();
        assert_eq!(info.status, QueryStatus::Pending);
        assert!(info.pair.is_none());
        assert!(info.price.is_none());
    }

    #[test]
    fn ids_split_mid_value() {
        let mut raw = Vec::new();
        for id in [7i64, -1, 1 << 40] {
            raw.extend_from_slice(&id.to_le_bytes());
        }
        let mut acc = AnswerAccumulator::new();
        acc.push(RESP_QUERY_IDS, &raw[..11]);
        acc.push(RESP_QUERY_IDS, &raw[11..]);
        assert_eq!(acc.query_ids(), vec![7, -1, 1 << 40]);
    }
}
