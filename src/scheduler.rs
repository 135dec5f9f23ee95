// src/scheduler.rs
//
// Top-level polling orchestrator. One logical loop runs cycles strictly
// sequentially; the known-pool set and block cursor are owned here and
// mutated only between phases, so no locking is needed in-process. The outer
// loop is the last line of defense: any error aborts the cycle cleanly
// without advancing the cursor, and the next cycle retries the same range
// after a bounded-jitter backoff.

use crate::aggregator;
use crate::backoff::RetryPolicy;
use crate::chain::{ChainReader, ChainView};
use crate::database::{self, DbPool, PoolRow, SnapshotStore};
use crate::extractor;
use crate::oracle;
use crate::reconciler;
use crate::registry::PoolRegistry;
use crate::settings::Settings;
use crate::tokens::TokenCache;
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::{Address, U256};
use log::{debug, error, info};
use std::collections::HashMap;
use tokio::time::Duration;

/// Cycle phases, in order. Any failure falls through to Sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Discovering,
    Extracting,
    Reconciling,
    Pricing,
    Aggregating,
    Persisting,
    Sleeping,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Discovering => "discovering",
            CyclePhase::Extracting => "extracting",
            CyclePhase::Reconciling => "reconciling",
            CyclePhase::Pricing => "pricing",
            CyclePhase::Aggregating => "aggregating",
            CyclePhase::Persisting => "persisting",
            CyclePhase::Sleeping => "sleeping",
        }
    }
}

/// Block range for this cycle: [cursor+1, head], or None when no new blocks
/// exist. An empty range skips event extraction but never reconciliation.
pub fn compute_range(cursor: u64, head: u64) -> Option<(u64, u64)> {
    (head > cursor).then(|| (cursor + 1, head))
}

pub struct Scheduler<C = ChainReader, S = DbPool> {
    settings: Settings,
    chain: C,
    db: S,
    registry: PoolRegistry,
    tokens: TokenCache,
    stable: Address,
    /// Last fully-processed block; advanced only after a clean cycle.
    cursor: u64,
    /// In-memory snapshot throttle; the SQL-side guard stays authoritative
    /// across instances.
    last_snapshot: HashMap<Address, DateTime<Utc>>,
}

impl Scheduler<ChainReader, DbPool> {
    /// Wire the production chain reader and store, then warm-start from
    /// whatever a previous run persisted.
    pub async fn new(settings: Settings) -> Result<Self> {
        let chain = ChainReader::new(
            &settings.rpc.http_url,
            Duration::from_secs(settings.rpc.call_timeout_seconds),
        )?;
        let db = database::connect(&settings.database.url).await?;
        let mut scheduler = Self::from_parts(settings, chain, db, 0)?;

        // Warm start: pools and token metadata already persisted by a
        // previous run don't need refetching.
        let stored = scheduler.db.load_pools().await?;
        for (meta, info_a, info_b) in stored {
            scheduler.tokens.insert(meta.token_a, info_a);
            scheduler.tokens.insert(meta.token_b, info_b);
            scheduler.registry.restore(meta);
        }
        if !scheduler.registry.is_empty() {
            info!(
                "♻️ [Scheduler] Restored {} pools from store",
                scheduler.registry.len()
            );
        }

        scheduler.cursor = match scheduler.db.load_cursor().await? {
            Some(block) => block,
            None => {
                let head = scheduler.chain.head_block().await?;
                head.saturating_sub(scheduler.settings.indexer.initial_lookback_blocks)
            }
        };
        info!("🚀 [Scheduler] Starting at cursor {}", scheduler.cursor);
        Ok(scheduler)
    }
}

impl<C: ChainView, S: SnapshotStore> Scheduler<C, S> {
    /// Assemble from already-constructed parts. Validates the settings and
    /// starts with an empty registry at the given cursor.
    pub fn from_parts(settings: Settings, chain: C, db: S, cursor: u64) -> Result<Self> {
        let (factory, stable) = settings.validate()?;
        let tokens = TokenCache::from_known(&settings.known_tokens);
        Ok(Self {
            chain,
            db,
            registry: PoolRegistry::new(factory),
            tokens,
            stable,
            cursor,
            last_snapshot: HashMap::new(),
            settings,
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn phase(&self, phase: CyclePhase) {
        debug!("[Cycle] → {}", phase.as_str());
    }

    /// Run cycles until ctrl-c. Shutdown is only observed between cycles so
    /// in-flight work finishes and the cursor is never advanced past
    /// partially-processed blocks.
    pub async fn run(mut self) -> Result<()> {
        let poll = Duration::from_secs(self.settings.indexer.poll_interval_seconds);
        let mut policy = RetryPolicy::new(Duration::from_secs(2), poll.saturating_mul(8));

        loop {
            let delay = match self.run_cycle().await {
                Ok(()) => {
                    policy.reset();
                    poll
                }
                Err(e) => {
                    let delay = policy.next_delay();
                    error!(
                        "💥 [Scheduler] Cycle failed (attempt {}): {:#}. Cursor held at {}, retrying in {:?}",
                        policy.attempt(),
                        e,
                        self.cursor,
                        delay
                    );
                    delay
                }
            };

            self.phase(CyclePhase::Sleeping);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("🛑 [Scheduler] Shutdown requested, cursor persisted at {}", self.cursor);
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run exactly one cycle (service loop and the --once flag).
    pub async fn run_once(&mut self) -> Result<()> {
        self.run_cycle().await
    }

    async fn run_cycle(&mut self) -> Result<()> {
        let head = self.chain.head_block().await?;
        let range = compute_range(self.cursor, head);
        if range.is_none() {
            // No new blocks, but balances can still move out-of-band, so the
            // reconciliation and persistence phases run regardless.
            debug!("[Cycle] No new blocks past {}", self.cursor);
        }

        self.phase(CyclePhase::Discovering);
        let fresh = self.registry.discover(&self.chain, range).await?;
        for meta in &fresh {
            self.tokens.resolve(&self.chain, meta.token_a).await;
            self.tokens.resolve(&self.chain, meta.token_b).await;
        }
        let pools = self.registry.known_pools();

        self.phase(CyclePhase::Extracting);
        let swaps = match range {
            Some(r) => {
                extractor::extract_swaps(
                    &self.chain,
                    &pools,
                    r,
                    self.settings.indexer.max_addresses_per_filter,
                )
                .await?
            }
            None => Vec::new(),
        };

        self.phase(CyclePhase::Reconciling);
        let states = reconciler::reconcile_reserves(
            &self.chain,
            &pools,
            self.settings.rpc.max_concurrent_requests,
        )
        .await?;

        self.phase(CyclePhase::Pricing);
        let mut decimals: HashMap<Address, u8> = HashMap::new();
        for state in &states {
            for token in [state.meta.token_a, state.meta.token_b] {
                decimals
                    .entry(token)
                    .or_insert_with(|| self.tokens.decimals(&token));
            }
        }
        let prices = oracle::resolve_usd_prices(&states, &decimals, self.stable);

        self.phase(CyclePhase::Aggregating);
        let now = Utc::now();
        let dust = U256::from(self.settings.indexer.dust_threshold_wei);
        let mut upserts: Vec<PoolRow> = Vec::new();
        let mut drained: Vec<Address> = Vec::new();
        let mut tvl_total = 0.0;
        for state in &states {
            if state.is_dust(dust) {
                // Dropped from the listing, but still tracked by the
                // registry so a refilled pool reappears.
                drained.push(state.meta.address);
                continue;
            }
            let tvl = aggregator::pool_tvl_usd(state, &decimals, &prices);
            tvl_total += tvl;
            upserts.push(PoolRow {
                meta: state.meta.clone(),
                token_a_info: self.tokens.resolve(&self.chain, state.meta.token_a).await,
                token_b_info: self.tokens.resolve(&self.chain, state.meta.token_b).await,
                reserve_a: state.reserve_a,
                reserve_b: state.reserve_b,
                tvl_usd: tvl,
                updated_at: now,
            });
        }

        self.phase(CyclePhase::Persisting);
        let inserted = self.db.insert_swap_events(&swaps).await?;
        self.db.upsert_pools(&upserts).await?;
        self.db.delete_pools(&drained).await?;

        let throttle =
            ChronoDuration::seconds(self.settings.indexer.snapshot_throttle_seconds as i64);
        let mut snapshots = 0usize;
        for state in &states {
            if state.is_dust(dust) {
                continue;
            }
            let address = state.meta.address;
            if !database::snapshot_due(self.last_snapshot.get(&address).copied(), now, throttle) {
                continue;
            }
            let (price_a_per_b, price_b_per_a) = oracle::pair_prices(
                state,
                decimals.get(&state.meta.token_a).copied().unwrap_or(18),
                decimals.get(&state.meta.token_b).copied().unwrap_or(18),
            );
            let written = self
                .db
                .insert_price_snapshot(
                    address,
                    now,
                    price_a_per_b,
                    price_b_per_a,
                    state.reserve_a,
                    state.reserve_b,
                    self.settings.indexer.snapshot_throttle_seconds as i64,
                )
                .await?;
            if written {
                self.last_snapshot.insert(address, now);
                snapshots += 1;
            }
        }

        // Window metrics come from the store, so they survive restarts and
        // range overlaps without double counting. This read sits before the
        // cursor advance: a failure aborts the cycle with the cursor held.
        let window_days = self.settings.indexer.volume_window_days;
        let events = self
            .db
            .load_swap_events_since(now - ChronoDuration::days(window_days))
            .await?;
        let buckets = aggregator::daily_volume(
            &events,
            self.stable,
            self.tokens.decimals(&self.stable),
            window_days,
            now,
        );
        let totals = aggregator::window_totals(&buckets);

        // Cursor advances only here, after every phase completed cleanly.
        if let Some((_, to)) = range {
            self.cursor = to;
        }
        self.db.save_cursor(self.cursor).await?;

        info!(
            "✅ [Cycle] cursor {} | pools {} | swaps +{} | snapshots +{} | TVL ${:.2} | {}d volume ${:.2} fees ${:.2}",
            self.cursor,
            upserts.len(),
            inserted,
            snapshots,
            tvl_total,
            window_days,
            totals.volume_usd,
            totals.fees_usd
        );
        Ok(())
    }
}
