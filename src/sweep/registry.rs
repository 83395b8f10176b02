//! Static pair registry grouped by tier

use serde::Serialize;

use crate::types::{SweepPair, Tier};

const REGISTRY: &[(&str, &str, &str, Tier)] = &[
    // Tier 1: core
    ("BINANCE", "BTC", "USDT", Tier::Core),
    ("BINANCE", "ETH", "USDT", Tier::Core),
    ("COINBASE", "BTC", "USD", Tier::Core),
    ("COINBASE", "ETH", "USD", Tier::Core),
    ("KRAKEN", "BTC", "USD", Tier::Core),
    // Tier 2: majors
    ("BINANCE", "SOL", "USDT", Tier::Majors),
    ("BINANCE", "BNB", "USDT", Tier::Majors),
    ("BINANCE", "XRP", "USDT", Tier::Majors),
    ("COINBASE", "SOL", "USD", Tier::Majors),
    ("KRAKEN", "ETH", "USD", Tier::Majors),
    ("KRAKEN", "XRP", "USD", Tier::Majors),
    // Tier 3: extended
    ("MEXC", "QUBIC", "USDT", Tier::Extended),
    ("GATEIO", "QUBIC", "USDT", Tier::Extended),
    ("BINANCE", "DOGE", "USDT", Tier::Extended),
    ("BINANCE", "ADA", "USDT", Tier::Extended),
    ("COINBASE", "LINK", "USD", Tier::Extended),
];

/// Pairs of the given tiers, in registry order
pub fn pairs_by_tier(tiers: &[Tier]) -> Vec<SweepPair> {
    REGISTRY
        .iter()
        .filter(|(_, _, _, tier)| tiers.contains(tier))
        .map(|&(oracle, c1, c2, tier)| SweepPair::new(oracle, c1, c2, tier))
        .collect()
}

pub fn all_pairs() -> Vec<SweepPair> {
    pairs_by_tier(&Tier::ALL)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub tier: Tier,
    pub pair_count: usize,
    pub cost_qu: u64,
    pub pairs: Vec<SweepPair>,
}

pub fn estimate_cost(tier: Tier, cost_per_query_qu: u64) -> CostEstimate {
    let pairs = pairs_by_tier(&[tier]);
    CostEstimate {
        tier,
        pair_count: pairs.len(),
        cost_qu: pairs.len() as u64 * cost_per_query_qu,
        pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_tier_has_pairs() {
        for tier in Tier::ALL {
            assert!(!pairs_by_tier(&[tier]).is_empty(), "tier {} empty", tier);
        }
    }

    #[test]
    fn registry_has_no_duplicate_pairs() {
        let all = all_pairs();
        let unique: HashSet<_> = all.iter().map(|p| p.key()).collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn multi_tier_selection_keeps_registry_order() {
        let pairs = pairs_by_tier(&[Tier::Majors, Tier::Core]);
        assert_eq!(pairs.first().unwrap().tier, Tier::Core);
        assert_eq!(
            pairs.len(),
            pairs_by_tier(&[Tier::Core]).len() + pairs_by_tier(&[Tier::Majors]).len()
        );
    }

    #[test]
    fn estimate_scales_with_pair_count() {
        let est = estimate_cost(Tier::Core, 10);
        assert_eq!(est.pair_count, 5);
        assert_eq!(est.cost_qu, 50);
    }

    #[test]
    fn pair_fields_fit_the_wire_layout() {
        for pair in all_pairs() {
            assert!(pair.oracle.len() <= 32);
            assert!(pair.currency1.len() <= 32);
            assert!(pair.currency2.len() <= 32);
        }
    }
}
