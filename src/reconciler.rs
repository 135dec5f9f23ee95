// src/reconciler.rs
//
// Authoritative reserve state for every known pool, every cycle. The pair
// contract's own reserve counters are computed from transaction-time inputs
// and can drift from the balances the pair actually holds, so they are never
// read; reserves here are always two ERC-20 balanceOf calls against the pool
// address. All pools are reconciled, not just those with new swap events:
// balances can change through external transfers with no event in range.

use crate::chain::BalanceReader;
use crate::registry::PairMeta;
use anyhow::Result;
use ethers::types::U256;
use futures::stream::{self, StreamExt};
use log::info;

#[derive(Debug, Clone)]
pub struct PoolState {
    pub meta: PairMeta,
    pub reserve_a: U256,
    pub reserve_b: U256,
}

impl PoolState {
    /// A pool with either reserve at or below the dust threshold is treated
    /// as drained and dropped from the store.
    pub fn is_dust(&self, threshold: U256) -> bool {
        self.reserve_a <= threshold || self.reserve_b <= threshold
    }
}

/// Read both token balances for every pool, with bounded concurrency across
/// independent pools. Any failed read aborts the cycle so the same range is
/// retried; partial reserve truth is worse than a late cycle.
pub async fn reconcile_reserves<B: BalanceReader>(
    reader: &B,
    pools: &[PairMeta],
    max_concurrent: usize,
) -> Result<Vec<PoolState>> {
    let states = stream::iter(pools.iter().cloned().map(|meta| async move {
        let reserve_a = reader.balance_of(meta.token_a, meta.address).await?;
        let reserve_b = reader.balance_of(meta.token_b, meta.address).await?;
        Ok::<_, anyhow::Error>(PoolState {
            meta,
            reserve_a,
            reserve_b,
        })
    }))
    .buffer_unordered(max_concurrent.max(1))
    .collect::<Vec<_>>()
    .await
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    info!("📊 [Reconciler] Reconciled reserves for {} pools", states.len());
    Ok(states)
}
