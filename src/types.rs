//! Core types shared by the sweep scheduler and the verification driver
//!
//! Defines pairs, tiers, query status and the collaborator return shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority/cost grouping of pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Core,
    Majors,
    Extended,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Core
    }
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Core, Tier::Majors, Tier::Extended];

    /// Numeric tier as used on the command line (1-based)
    pub fn number(&self) -> u8 {
        match self {
            Tier::Core => 1,
            Tier::Majors => 2,
            Tier::Extended => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::Core),
            2 => Some(Tier::Majors),
            3 => Some(Tier::Extended),
            _ => None,
        }
    }

    /// Parse a comma separated tier list such as `1,2`
    pub fn parse_list(s: &str) -> Option<Vec<Self>> {
        let mut tiers = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let tier = Self::from_number(part.parse().ok()?)?;
            if !tiers.contains(&tier) {
                tiers.push(tier);
            }
        }
        if tiers.is_empty() {
            None
        } else {
            Some(tiers)
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Core => write!(f, "1 (core)"),
            Tier::Majors => write!(f, "2 (majors)"),
            Tier::Extended => write!(f, "3 (extended)"),
        }
    }
}

/// An `(oracle, currency1, currency2)` triple plus its tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepPair {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
    pub tier: Tier,
}

impl SweepPair {
    pub fn new(oracle: &str, currency1: &str, currency2: &str, tier: Tier) -> Self {
        Self {
            oracle: oracle.to_string(),
            currency1: currency1.to_string(),
            currency2: currency2.to_string(),
            tier,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey {
            oracle: self.oracle.clone(),
            currency1: self.currency1.clone(),
            currency2: self.currency2.clone(),
        }
    }
}

impl fmt::Display for SweepPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.oracle, self.currency1, self.currency2)
    }
}

/// Grouping key for decoded prices, ordered for stable reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairKey {
    pub oracle: String,
    pub currency1: String,
    pub currency2: String,
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.oracle, self.currency1, self.currency2)
    }
}

/// Oracle query lifecycle status, as encoded in the metadata status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Unknown,
    Pending,
    Committed,
    Success,
    Timeout,
    Unresolvable,
}

impl QueryStatus {
    const TABLE: [QueryStatus; 6] = [
        QueryStatus::Unknown,
        QueryStatus::Pending,
        QueryStatus::Committed,
        QueryStatus::Success,
        QueryStatus::Timeout,
        QueryStatus::Unresolvable,
    ];

    /// Out-of-range bytes map to `Unknown`
    pub fn from_byte(b: u8) -> Self {
        Self::TABLE
            .get(b as usize)
            .copied()
            .unwrap_or(QueryStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Unknown => "unknown",
            QueryStatus::Pending => "pending",
            QueryStatus::Committed => "committed",
            QueryStatus::Success => "success",
            QueryStatus::Timeout => "timeout",
            QueryStatus::Unresolvable => "unresolvable",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current network tick and epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInfo {
    pub tick: u32,
    pub epoch: u16,
}

/// Result of a successful oracle-query broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub success: bool,
    pub tx_id: String,
    pub peers_broadcasted: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_list_parses_and_dedups() {
        assert_eq!(
            Tier::parse_list("1,2,1"),
            Some(vec![Tier::Core, Tier::Majors])
        );
        assert_eq!(Tier::parse_list("3"), Some(vec![Tier::Extended]));
        assert_eq!(Tier::parse_list("4"), None);
        assert_eq!(Tier::parse_list("x"), None);
        assert_eq!(Tier::parse_list(""), None);
    }

    #[test]
    fn status_table_matches_wire_bytes() {
        assert_eq!(QueryStatus::from_byte(0), QueryStatus::Unknown);
        assert_eq!(QueryStatus::from_byte(3), QueryStatus::Success);
        assert_eq!(QueryStatus::from_byte(5), QueryStatus::Unresolvable);
        assert_eq!(QueryStatus::from_byte(200), QueryStatus::Unknown);
        assert_eq!(QueryStatus::Timeout.as_str(), "timeout");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&QueryStatus::Committed).unwrap();
        assert_eq!(json, "\"committed\"");
    }
}
