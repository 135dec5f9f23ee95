// src/registry.rs
//
// Enumerates pools from the factory and tracks newly created ones. The
// factory index is paged from a high-water mark so a steady-state cycle costs
// one allPairsLength call; pools created inside the current block range are
// also picked up from PairCreated logs without waiting for the next scan.

use crate::chain::ChainView;
use crate::contracts::PairCreatedFilter;
use anyhow::Result;
use ethers::contract::EthEvent;
use ethers::types::{Address, Filter, Log, H256};
use log::{debug, info};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static PAIR_CREATED_TOPIC: Lazy<H256> = Lazy::new(PairCreatedFilter::signature);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairMeta {
    pub address: Address,
    pub token_a: Address,
    pub token_b: Address,
}

/// Decode a raw PairCreated log: token0/token1 indexed, pair address in the
/// first data word. Returns None for logs that don't match the shape.
pub fn decode_pair_created(log: &Log) -> Option<PairMeta> {
    if log.topics.len() < 3 || log.topics[0] != *PAIR_CREATED_TOPIC || log.data.len() < 32 {
        return None;
    }
    Some(PairMeta {
        address: Address::from_slice(&log.data[12..32]),
        token_a: Address::from_slice(&log.topics[1].as_bytes()[12..]),
        token_b: Address::from_slice(&log.topics[2].as_bytes()[12..]),
    })
}

pub struct PoolRegistry {
    factory: Address,
    // Addresses are H160, so case differences in the source encoding cannot
    // produce duplicate keys here.
    known: HashMap<Address, PairMeta>,
    /// Factory indices already paged through.
    enumerated: u64,
}

impl PoolRegistry {
    pub fn new(factory: Address) -> Self {
        Self {
            factory,
            known: HashMap::new(),
            enumerated: 0,
        }
    }

    pub fn known_pools(&self) -> Vec<PairMeta> {
        self.known.values().cloned().collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.known.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Admit a pool into the known set. Returns false if it was already known.
    pub fn admit(&mut self, meta: PairMeta) -> bool {
        self.known.insert(meta.address, meta.clone()).is_none()
    }

    /// Warm start from the store: mark a pool known without touching the
    /// enumeration high-water mark.
    pub fn restore(&mut self, meta: PairMeta) {
        self.known.entry(meta.address).or_insert(meta);
    }

    /// Discover pools for this cycle: page fresh factory indices, then consume
    /// PairCreated logs in the cycle's block range. Returns the pools first
    /// seen during this call. An unreachable factory propagates and aborts
    /// the cycle.
    pub async fn discover<C: ChainView + ?Sized>(
        &mut self,
        chain: &C,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<PairMeta>> {
        let mut fresh = Vec::new();

        let count = chain.factory_pair_count(self.factory).await?;
        for index in self.enumerated..count {
            let pair = chain.factory_pair_at(self.factory, index).await?;
            if self.contains(&pair) {
                self.enumerated = index + 1;
                continue;
            }
            let (token_a, token_b) = chain.pair_tokens(pair).await?;
            let meta = PairMeta {
                address: pair,
                token_a,
                token_b,
            };
            self.admit(meta.clone());
            // The high-water mark moves only once the pool is admitted, so a
            // failed token read leaves this index to be retried next cycle.
            self.enumerated = index + 1;
            fresh.push(meta);
        }

        if let Some((from, to)) = range {
            let filter = Filter::new()
                .address(self.factory)
                .topic0(*PAIR_CREATED_TOPIC)
                .from_block(from)
                .to_block(to);
            for log in chain.get_logs(&filter).await? {
                if let Some(meta) = decode_pair_created(&log) {
                    if self.admit(meta.clone()) {
                        debug!(
                            "🔍 [Registry] Pool {:?} created in-range ({:?}/{:?})",
                            meta.address, meta.token_a, meta.token_b
                        );
                        fresh.push(meta);
                    }
                }
            }
        }

        if !fresh.is_empty() {
            info!(
                "📊 [Registry] Discovered {} new pools ({} known)",
                fresh.len(),
                self.known.len()
            );
        }
        Ok(fresh)
    }
}
