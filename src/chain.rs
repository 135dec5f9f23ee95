// src/chain.rs
//
// Thin facade over the RPC endpoint. Every call is wrapped in a timeout so one
// unresponsive endpoint fails the current step instead of stalling the
// scheduler indefinitely.

use crate::contracts::Erc20;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, U256};
use log::debug;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::warn;

const TIMESTAMP_CACHE_MAX: usize = 8192;

/// Ground-truth balance reads behind an interface, so a future design can
/// supplement polling with event-triggered reconciliation and so tests can
/// substitute a fixture.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// ERC-20 balanceOf(holder) on the token contract.
    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256>;
}

/// Everything the cycle reads from the chain, behind one seam so discovery,
/// extraction and the full cycle can be driven against fixtures.
#[async_trait]
pub trait ChainView: BalanceReader {
    async fn head_block(&self) -> Result<u64>;
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;
    /// Unix timestamp of a block.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64>;
    async fn factory_pair_count(&self, factory: Address) -> Result<u64>;
    async fn factory_pair_at(&self, factory: Address, index: u64) -> Result<Address>;
    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address)>;
    async fn token_symbol(&self, token: Address) -> Result<String>;
    async fn token_decimals(&self, token: Address) -> Result<u8>;
}

pub struct ChainReader {
    provider: Arc<Provider<Http>>,
    call_timeout: Duration,
    // Block timestamps are immutable once mined; cache them so enriching many
    // logs from the same block costs one read.
    block_timestamps: DashMap<u64, u64>,
}

impl ChainReader {
    pub fn new(rpc_url: &str, call_timeout: Duration) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url).context("invalid RPC endpoint URL")?;
        Ok(Self {
            provider: Arc::new(provider),
            call_timeout,
            block_timestamps: DashMap::new(),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    async fn bounded<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(res) => res.with_context(|| format!("{} failed", what)),
            Err(_) => {
                warn!("RPC timeout after {:?} during {}", self.call_timeout, what);
                Err(anyhow!("RPC timeout during {}", what))
            }
        }
    }
}

#[async_trait]
impl ChainView for ChainReader {
    async fn head_block(&self) -> Result<u64> {
        let n = self
            .bounded("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(n.as_u64())
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.bounded("eth_getLogs", self.provider.get_logs(filter))
            .await
    }

    /// Cached per block number.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64> {
        if let Some(ts) = self.block_timestamps.get(&block_number) {
            return Ok(*ts);
        }
        let block = self
            .bounded("eth_getBlockByNumber", self.provider.get_block(block_number))
            .await?
            .ok_or_else(|| anyhow!("block {} not found", block_number))?;
        let ts = block.timestamp.as_u64();
        if self.block_timestamps.len() >= TIMESTAMP_CACHE_MAX {
            debug!("Block timestamp cache full, clearing {} entries", self.block_timestamps.len());
            self.block_timestamps.clear();
        }
        self.block_timestamps.insert(block_number, ts);
        Ok(ts)
    }

    async fn factory_pair_count(&self, factory: Address) -> Result<u64> {
        let factory = crate::contracts::IExchangeFactory::new(factory, self.provider.clone());
        let count = self
            .bounded("factory.allPairsLength", factory.all_pairs_length().call())
            .await?;
        Ok(count.as_u64())
    }

    async fn factory_pair_at(&self, factory: Address, index: u64) -> Result<Address> {
        let factory = crate::contracts::IExchangeFactory::new(factory, self.provider.clone());
        self.bounded(
            "factory.allPairs",
            factory.all_pairs(U256::from(index)).call(),
        )
        .await
    }

    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address)> {
        let pair = crate::contracts::IExchangePair::new(pair, self.provider.clone());
        let token_a = self.bounded("pair.token0", pair.token_0().call()).await?;
        let token_b = self.bounded("pair.token1", pair.token_1().call()).await?;
        Ok((token_a, token_b))
    }

    async fn token_symbol(&self, token: Address) -> Result<String> {
        let erc20 = Erc20::new(token, self.provider.clone());
        self.bounded("erc20.symbol", erc20.symbol().call()).await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        let erc20 = Erc20::new(token, self.provider.clone());
        self.bounded("erc20.decimals", erc20.decimals().call()).await
    }
}

#[async_trait]
impl BalanceReader for ChainReader {
    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256> {
        let erc20 = Erc20::new(token, self.provider.clone());
        self.bounded("erc20.balanceOf", erc20.balance_of(holder).call())
            .await
    }
}
