// src/oracle.rs
//
// USD price discovery over the pool graph. The stable asset anchors the graph
// at exactly 1.0; every other token is priced by walking pool edges outward
// from it with an explicit worklist and a visited set, so cyclic pool graphs
// (A/B, B/C, C/A with no stable leg) terminate instead of recursing forever.
// A token with no route to the stable asset prices at 0.0 - a data-quality
// gap, not an error.

use crate::normalization::to_float;
use crate::reconciler::PoolState;
use ethers::types::Address;
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve USD prices for every token appearing in the given pool states.
/// Prices are computed once per token per cycle and shared by all consumers.
pub fn resolve_usd_prices(
    states: &[PoolState],
    decimals: &HashMap<Address, u8>,
    stable: Address,
) -> HashMap<Address, f64> {
    let dec = |token: &Address| decimals.get(token).copied().unwrap_or(18);

    // Adjacency over the pool graph: token -> (counterparty, own normalized
    // reserve, counterparty normalized reserve). Empty pools contribute no
    // edges; a ratio against a zero reserve is meaningless.
    let mut adjacency: HashMap<Address, Vec<(Address, f64, f64)>> = HashMap::new();
    let mut prices: HashMap<Address, f64> = HashMap::new();

    for state in states {
        let token_a = state.meta.token_a;
        let token_b = state.meta.token_b;
        prices.entry(token_a).or_insert(0.0);
        prices.entry(token_b).or_insert(0.0);

        let norm_a = to_float(state.reserve_a, dec(&token_a));
        let norm_b = to_float(state.reserve_b, dec(&token_b));
        if norm_a <= 0.0 || norm_b <= 0.0 {
            continue;
        }
        adjacency.entry(token_a).or_default().push((token_b, norm_a, norm_b));
        adjacency.entry(token_b).or_default().push((token_a, norm_b, norm_a));
    }

    // The stable asset is the fixed-price anchor, always exactly 1.0. It is
    // seeded as visited so no pool ratio can ever overwrite it.
    prices.insert(stable, 1.0);
    let mut visited: HashSet<Address> = HashSet::new();
    visited.insert(stable);

    let mut worklist: VecDeque<Address> = VecDeque::new();
    worklist.push_back(stable);

    while let Some(token) = worklist.pop_front() {
        let price = prices.get(&token).copied().unwrap_or(0.0);
        let Some(edges) = adjacency.get(&token) else {
            continue;
        };
        for &(other, own_reserve, other_reserve) in edges {
            if visited.insert(other) {
                // One unit of `other` trades for own_reserve/other_reserve
                // units of `token`, so its USD value chains through.
                prices.insert(other, price * (own_reserve / other_reserve));
                worklist.push_back(other);
            }
        }
    }

    prices
}

/// Spot prices of a single pool (A per B, B per A), decimal-normalized. Used
/// for price history snapshots; 0.0 when either side is empty.
pub fn pair_prices(state: &PoolState, decimals_a: u8, decimals_b: u8) -> (f64, f64) {
    let norm_a = to_float(state.reserve_a, decimals_a);
    let norm_b = to_float(state.reserve_b, decimals_b);
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return (0.0, 0.0);
    }
    (norm_a / norm_b, norm_b / norm_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PairMeta;
    use ethers::types::U256;

    fn addr(n: u8) -> Address {
        Address::from_low_u64_be(n as u64)
    }

    fn pool(n: u8, token_a: Address, reserve_a: u64, token_b: Address, reserve_b: u64) -> PoolState {
        PoolState {
            meta: PairMeta {
                address: addr(n),
                token_a,
                token_b,
            },
            reserve_a: U256::from(reserve_a) * U256::exp10(18),
            reserve_b: U256::from(reserve_b) * U256::exp10(18),
        }
    }

    fn all_18(tokens: &[Address]) -> HashMap<Address, u8> {
        tokens.iter().map(|t| (*t, 18u8)).collect()
    }

    #[test]
    fn test_stable_asset_is_exactly_one() {
        let stable = addr(1);
        let tkn = addr(2);
        let states = vec![pool(10, stable, 1000, tkn, 500)];
        let prices = resolve_usd_prices(&states, &all_18(&[stable, tkn]), stable);
        assert_eq!(prices[&stable], 1.0);
    }

    #[test]
    fn test_direct_pool_pricing_with_mixed_decimals() {
        // Scenario A: stable reserve 1000 at 6 decimals, TKN reserve 500 at 18
        let stable = addr(1);
        let tkn = addr(2);
        let states = vec![PoolState {
            meta: PairMeta {
                address: addr(10),
                token_a: stable,
                token_b: tkn,
            },
            reserve_a: U256::from(1000u64) * U256::exp10(6),
            reserve_b: U256::from(500u64) * U256::exp10(18),
        }];
        let decimals = HashMap::from([(stable, 6u8), (tkn, 18u8)]);
        let prices = resolve_usd_prices(&states, &decimals, stable);
        assert!((prices[&tkn] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_hop_pricing() {
        // B prices directly: 300 stable / 100 B = 3.0
        // A prices via B:    50 B / 100 A = 0.5 B per A -> 1.5 USD
        let stable = addr(1);
        let token_b = addr(2);
        let token_a = addr(3);
        let states = vec![
            pool(10, stable, 300, token_b, 100),
            pool(11, token_b, 50, token_a, 100),
        ];
        let prices =
            resolve_usd_prices(&states, &all_18(&[stable, token_a, token_b]), stable);
        assert!((prices[&token_b] - 3.0).abs() < 1e-9);
        assert!((prices[&token_a] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_cyclic_graph_without_stable_leg_terminates_at_zero() {
        let stable = addr(1);
        let (a, b, c) = (addr(2), addr(3), addr(4));
        let states = vec![
            pool(10, a, 100, b, 100),
            pool(11, b, 100, c, 100),
            pool(12, c, 100, a, 100),
        ];
        let prices = resolve_usd_prices(&states, &all_18(&[a, b, c]), stable);
        assert_eq!(prices[&a], 0.0);
        assert_eq!(prices[&b], 0.0);
        assert_eq!(prices[&c], 0.0);
    }

    #[test]
    fn test_cyclic_graph_with_stable_leg_terminates() {
        let stable = addr(1);
        let (a, b, c) = (addr(2), addr(3), addr(4));
        let states = vec![
            pool(10, stable, 200, a, 100),
            pool(11, a, 100, b, 100),
            pool(12, b, 100, c, 100),
            pool(13, c, 100, a, 100),
        ];
        let prices = resolve_usd_prices(&states, &all_18(&[stable, a, b, c]), stable);
        assert!((prices[&a] - 2.0).abs() < 1e-9);
        assert!((prices[&b] - 2.0).abs() < 1e-9);
        assert!((prices[&c] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_pool_contributes_no_route() {
        let stable = addr(1);
        let tkn = addr(2);
        let states = vec![pool(10, stable, 0, tkn, 500)];
        let prices = resolve_usd_prices(&states, &all_18(&[stable, tkn]), stable);
        assert_eq!(prices[&tkn], 0.0);
    }

    #[test]
    fn test_pair_prices() {
        let stable = addr(1);
        let tkn = addr(2);
        let state = pool(10, stable, 1000, tkn, 500);
        let (a_per_b, b_per_a) = pair_prices(&state, 18, 18);
        assert!((a_per_b - 2.0).abs() < 1e-9);
        assert!((b_per_a - 0.5).abs() < 1e-9);
    }
}
