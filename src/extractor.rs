// src/extractor.rs
//
// Fetches Swap logs for the cycle's block range and normalizes them into
// canonical records. Direction is resolved from which "in" leg is nonzero; a
// log with both in-amounts zero is malformed and dropped.

use crate::chain::ChainView;
use crate::contracts::SwapFilter;
use crate::registry::PairMeta;
use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::contract::EthEvent;
use ethers::types::{Address, Filter, Log, H256, U256};
use log::{debug, info};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static SWAP_TOPIC: Lazy<H256> = Lazy::new(SwapFilter::signature);

/// Canonical swap record, keyed by transaction hash (idempotence boundary).
#[derive(Debug, Clone)]
pub struct SwapRecord {
    pub tx_hash: H256,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSwap {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
}

/// Decode the four amount words of a Swap log and resolve direction against
/// the pool's token pair. A nonzero tokenA-in amount means tokenIn = tokenA;
/// both in-amounts zero means the log is malformed.
pub fn decode_swap_log(log: &Log, meta: &PairMeta) -> Option<DecodedSwap> {
    if log.topics.first() != Some(&*SWAP_TOPIC) || log.data.len() < 128 {
        return None;
    }
    let amount_a_in = U256::from_big_endian(&log.data[0..32]);
    let amount_b_in = U256::from_big_endian(&log.data[32..64]);
    let amount_a_out = U256::from_big_endian(&log.data[64..96]);
    let amount_b_out = U256::from_big_endian(&log.data[96..128]);

    if !amount_a_in.is_zero() {
        Some(DecodedSwap {
            token_in: meta.token_a,
            token_out: meta.token_b,
            amount_in: amount_a_in,
            amount_out: amount_b_out,
        })
    } else if !amount_b_in.is_zero() {
        Some(DecodedSwap {
            token_in: meta.token_b,
            token_out: meta.token_a,
            amount_in: amount_b_in,
            amount_out: amount_a_out,
        })
    } else {
        None
    }
}

/// Extract swap records for all known pools within [from, to], in discovery
/// order. One getLogs per address chunk; each log costs one (cached) block
/// timestamp read for enrichment.
pub async fn extract_swaps<C: ChainView + ?Sized>(
    chain: &C,
    pools: &[PairMeta],
    range: (u64, u64),
    max_addresses_per_filter: usize,
) -> Result<Vec<SwapRecord>> {
    let (from, to) = range;
    let by_address: HashMap<Address, &PairMeta> =
        pools.iter().map(|m| (m.address, m)).collect();
    let addresses: Vec<Address> = pools.iter().map(|m| m.address).collect();

    let mut records = Vec::new();
    for chunk in addresses.chunks(max_addresses_per_filter.max(1)) {
        let filter = Filter::new()
            .address(chunk.to_vec())
            .topic0(*SWAP_TOPIC)
            .from_block(from)
            .to_block(to);

        for log in chain.get_logs(&filter).await? {
            let Some(meta) = by_address.get(&log.address) else {
                continue;
            };
            let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number)
            else {
                debug!("⚠️ [Extractor] Skipping pending log for pool {:?}", log.address);
                continue;
            };
            let Some(decoded) = decode_swap_log(&log, meta) else {
                debug!(
                    "⚠️ [Extractor] Malformed swap log in tx {:?} (both in-amounts zero)",
                    log.transaction_hash
                );
                continue;
            };

            let block_number = block_number.as_u64();
            let unix_ts = chain.block_timestamp(block_number).await?;
            let timestamp =
                DateTime::<Utc>::from_timestamp(unix_ts as i64, 0).unwrap_or_else(Utc::now);

            records.push(SwapRecord {
                tx_hash,
                pool: meta.address,
                token_in: decoded.token_in,
                token_out: decoded.token_out,
                amount_in: decoded.amount_in,
                amount_out: decoded.amount_out,
                block_number,
                timestamp,
            });
        }
    }

    if !records.is_empty() {
        info!(
            "📊 [Extractor] Extracted {} swaps in blocks {}..={}",
            records.len(),
            from,
            to
        );
    }
    Ok(records)
}
