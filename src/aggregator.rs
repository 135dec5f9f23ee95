// src/aggregator.rs
//
// Derived figures: per-pool TVL from current reserves and cycle prices, and
// rolling-window volume/fees from persisted swap events, bucketed by calendar
// day for charting.

use crate::extractor::SwapRecord;
use crate::normalization::to_float;
use crate::reconciler::PoolState;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use ethers::types::Address;
use std::collections::{BTreeMap, HashMap};

/// The pool's constant fee schedule (0.3%).
pub const FEE_RATE: f64 = 0.003;

/// TVL contribution of one pool in USD. When exactly one leg has a known
/// price the priced leg is counted twice (constant-product reserves hold
/// near-equal value on both sides); with no priced leg the pool contributes
/// nothing rather than failing the cycle.
pub fn pool_tvl_usd(
    state: &PoolState,
    decimals: &HashMap<Address, u8>,
    prices: &HashMap<Address, f64>,
) -> f64 {
    let dec = |token: &Address| decimals.get(token).copied().unwrap_or(18);
    let price_a = prices.get(&state.meta.token_a).copied().unwrap_or(0.0);
    let price_b = prices.get(&state.meta.token_b).copied().unwrap_or(0.0);
    let norm_a = to_float(state.reserve_a, dec(&state.meta.token_a));
    let norm_b = to_float(state.reserve_b, dec(&state.meta.token_b));

    match (price_a > 0.0, price_b > 0.0) {
        (true, true) => norm_a * price_a + norm_b * price_b,
        (true, false) => 2.0 * norm_a * price_a,
        (false, true) => 2.0 * norm_b * price_b,
        (false, false) => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyBucket {
    pub volume_usd: f64,
    pub fees_usd: f64,
}

/// Volume and fees per calendar day over the trailing window. Only events
/// with a stable-asset leg are valued (that leg's normalized amount is the
/// USD contribution); events with neither leg in the stable asset have no
/// valuation route and are skipped.
pub fn daily_volume(
    events: &[SwapRecord],
    stable: Address,
    stable_decimals: u8,
    window_days: i64,
    now: DateTime<Utc>,
) -> BTreeMap<NaiveDate, DailyBucket> {
    let cutoff = now - Duration::days(window_days);
    let mut buckets: BTreeMap<NaiveDate, DailyBucket> = BTreeMap::new();

    for event in events {
        if event.timestamp < cutoff {
            continue;
        }
        let stable_amount = if event.token_in == stable {
            event.amount_in
        } else if event.token_out == stable {
            event.amount_out
        } else {
            continue;
        };
        let usd = to_float(stable_amount, stable_decimals);
        let bucket = buckets.entry(event.timestamp.date_naive()).or_default();
        bucket.volume_usd += usd;
        bucket.fees_usd += usd * FEE_RATE;
    }

    buckets
}

/// Window totals across all buckets.
pub fn window_totals(buckets: &BTreeMap<NaiveDate, DailyBucket>) -> DailyBucket {
    buckets.values().fold(DailyBucket::default(), |acc, b| DailyBucket {
        volume_usd: acc.volume_usd + b.volume_usd,
        fees_usd: acc.fees_usd + b.fees_usd,
    })
}
