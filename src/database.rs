// src/database.rs
//
// PostgreSQL persistence: pools, swap events, price history and the
// processing cursor. All writes are idempotent (address / tx-hash /
// pool+timestamp keys), so re-processing a block range after a restart or a
// second indexer instance writing concurrently never duplicates rows.

use crate::extractor::SwapRecord;
use crate::registry::PairMeta;
use crate::tokens::TokenInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::{Address, H256, U256};
use log::{info, warn};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, Row};
use std::str::FromStr;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Database schema name.
pub const SCHEMA: &str = "amm_index";

/// Single row id of the processing cursor.
const CURSOR_ID: &str = "main";

/// Connect with exponential backoff to survive DNS/startup races in Compose,
/// then initialize the schema.
pub async fn connect(database_url: &str) -> Result<DbPool> {
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(10);

    let pool = Retry::spawn(strategy, || async {
        PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
    })
    .await
    .context("could not connect to database")?;

    initialize_database(&pool).await?;
    info!("✅ Connected to database, schema '{}' ready", SCHEMA);
    Ok(pool)
}

pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    // Serialize DDL across concurrently starting instances.
    const MIGRATION_LOCK_ID: i64 = 0x414D4D5F494E4458; // "AMM_INDX"

    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await?;

    let result = run_ddl(&mut conn).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await?;

    result
}

async fn run_ddl(conn: &mut sqlx::pool::PoolConnection<Postgres>) -> Result<()> {
    let statements = [
        format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.pools (
                address TEXT PRIMARY KEY,
                token_a TEXT NOT NULL,
                token_b TEXT NOT NULL,
                symbol_a TEXT NOT NULL,
                symbol_b TEXT NOT NULL,
                decimals_a INT NOT NULL,
                decimals_b INT NOT NULL,
                reserve_a TEXT NOT NULL,
                reserve_b TEXT NOT NULL,
                tvl_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.swap_events (
                tx_hash TEXT PRIMARY KEY,
                pool_address TEXT NOT NULL,
                token_in TEXT NOT NULL,
                token_out TEXT NOT NULL,
                amount_in TEXT NOT NULL,
                amount_out TEXT NOT NULL,
                block_number BIGINT NOT NULL,
                ts TIMESTAMPTZ NOT NULL
            )",
            SCHEMA
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS swap_events_ts_idx ON {}.swap_events (ts)",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.price_history (
                pool_address TEXT NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                price_a_per_b DOUBLE PRECISION NOT NULL,
                price_b_per_a DOUBLE PRECISION NOT NULL,
                reserve_a TEXT NOT NULL,
                reserve_b TEXT NOT NULL,
                PRIMARY KEY (pool_address, ts)
            )",
            SCHEMA
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {}.indexer_state (
                id TEXT PRIMARY KEY,
                last_processed_block BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            SCHEMA
        ),
    ];
    for statement in &statements {
        sqlx::query(statement).execute(&mut **conn).await?;
    }
    Ok(())
}

fn addr_str(address: &Address) -> String {
    format!("{:?}", address)
}

/// Fully materialized pool row, written back every cycle.
#[derive(Debug, Clone)]
pub struct PoolRow {
    pub meta: PairMeta,
    pub token_a_info: TokenInfo,
    pub token_b_info: TokenInfo,
    pub reserve_a: U256,
    pub reserve_b: U256,
    pub tvl_usd: f64,
    pub updated_at: DateTime<Utc>,
}

/// Upsert all pool rows in one transaction, keyed by pool address.
pub async fn upsert_pools(db: &DbPool, rows: &[PoolRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut tx = db.begin().await?;
    for row in rows {
        sqlx::query(&format!(
            "INSERT INTO {}.pools
                (address, token_a, token_b, symbol_a, symbol_b, decimals_a, decimals_b,
                 reserve_a, reserve_b, tvl_usd, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT(address) DO UPDATE SET
                symbol_a = excluded.symbol_a,
                symbol_b = excluded.symbol_b,
                decimals_a = excluded.decimals_a,
                decimals_b = excluded.decimals_b,
                reserve_a = excluded.reserve_a,
                reserve_b = excluded.reserve_b,
                tvl_usd = excluded.tvl_usd,
                updated_at = excluded.updated_at",
            SCHEMA
        ))
        .bind(addr_str(&row.meta.address))
        .bind(addr_str(&row.meta.token_a))
        .bind(addr_str(&row.meta.token_b))
        .bind(&row.token_a_info.symbol)
        .bind(&row.token_b_info.symbol)
        .bind(row.token_a_info.decimals as i32)
        .bind(row.token_b_info.decimals as i32)
        .bind(row.reserve_a.to_string())
        .bind(row.reserve_b.to_string())
        .bind(row.tvl_usd)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Remove drained pools (dust-level reserves) from the listing.
pub async fn delete_pools(db: &DbPool, addresses: &[Address]) -> Result<()> {
    if addresses.is_empty() {
        return Ok(());
    }
    let mut tx = db.begin().await?;
    for address in addresses {
        sqlx::query(&format!("DELETE FROM {}.pools WHERE address = $1", SCHEMA))
            .bind(addr_str(address))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    info!("🧹 [Store] Deleted {} drained pools", addresses.len());
    Ok(())
}

/// Insert swap events keyed by tx hash. Re-observing the same hash (range
/// overlap after restart) is a no-op, never a duplicate row.
pub async fn insert_swap_events(db: &DbPool, events: &[SwapRecord]) -> Result<u64> {
    if events.is_empty() {
        return Ok(0);
    }
    let mut inserted = 0u64;
    let mut tx = db.begin().await?;
    for event in events {
        let result = sqlx::query(&format!(
            "INSERT INTO {}.swap_events
                (tx_hash, pool_address, token_in, token_out, amount_in, amount_out, block_number, ts)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (tx_hash) DO NOTHING",
            SCHEMA
        ))
        .bind(format!("{:?}", event.tx_hash))
        .bind(addr_str(&event.pool))
        .bind(addr_str(&event.token_in))
        .bind(addr_str(&event.token_out))
        .bind(event.amount_in.to_string())
        .bind(event.amount_out.to_string())
        .bind(event.block_number as i64)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Throttle decision for price snapshots: due when no snapshot has been taken
/// yet, or the last one is at least `throttle` old. The SQL guard in
/// `insert_price_snapshot` remains the authority across instances; this
/// in-memory check just avoids pointless round trips inside the window.
pub fn snapshot_due(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    throttle: ChronoDuration,
) -> bool {
    match last {
        None => true,
        Some(ts) => now - ts >= throttle,
    }
}

/// Append a price snapshot unless one exists for this pool within the
/// throttle window. Returns whether a row was written.
pub async fn insert_price_snapshot(
    db: &DbPool,
    pool_address: Address,
    ts: DateTime<Utc>,
    price_a_per_b: f64,
    price_b_per_a: f64,
    reserve_a: U256,
    reserve_b: U256,
    throttle_seconds: i64,
) -> Result<bool> {
    let result = sqlx::query(&format!(
        "INSERT INTO {}.price_history
            (pool_address, ts, price_a_per_b, price_b_per_a, reserve_a, reserve_b)
         SELECT $1, $2, $3, $4, $5, $6
         WHERE NOT EXISTS (
            SELECT 1 FROM {}.price_history
            WHERE pool_address = $1 AND ts > $2 - ($7 * INTERVAL '1 second')
         )
         ON CONFLICT (pool_address, ts) DO NOTHING",
        SCHEMA, SCHEMA
    ))
    .bind(addr_str(&pool_address))
    .bind(ts)
    .bind(price_a_per_b)
    .bind(price_b_per_a)
    .bind(reserve_a.to_string())
    .bind(reserve_b.to_string())
    .bind(throttle_seconds)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Last fully-processed block, if a previous run persisted one.
pub async fn load_cursor(db: &DbPool) -> Result<Option<u64>> {
    let row = sqlx::query(&format!(
        "SELECT last_processed_block FROM {}.indexer_state WHERE id = $1",
        SCHEMA
    ))
    .bind(CURSOR_ID)
    .fetch_optional(db)
    .await?;
    Ok(row.map(|r| r.get::<i64, _>("last_processed_block") as u64))
}

pub async fn save_cursor(db: &DbPool, block_number: u64) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {}.indexer_state (id, last_processed_block, updated_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (id) DO UPDATE SET
            last_processed_block = excluded.last_processed_block,
            updated_at = excluded.updated_at",
        SCHEMA
    ))
    .bind(CURSOR_ID)
    .bind(block_number as i64)
    .bind(Utc::now())
    .execute(db)
    .await?;
    Ok(())
}

/// Known pools with their token metadata, for registry/token-cache warm start
/// after a restart. Unparseable rows are skipped with a warning.
pub async fn load_pools(db: &DbPool) -> Result<Vec<(PairMeta, TokenInfo, TokenInfo)>> {
    let rows = sqlx::query(&format!(
        "SELECT address, token_a, token_b, symbol_a, symbol_b, decimals_a, decimals_b
         FROM {}.pools",
        SCHEMA
    ))
    .fetch_all(db)
    .await?;

    let mut pools = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed = (
            Address::from_str(row.get::<String, _>("address").as_str()),
            Address::from_str(row.get::<String, _>("token_a").as_str()),
            Address::from_str(row.get::<String, _>("token_b").as_str()),
        );
        let (Ok(address), Ok(token_a), Ok(token_b)) = parsed else {
            warn!("⚠️ [Store] Skipping pool row with unparseable address");
            continue;
        };
        pools.push((
            PairMeta {
                address,
                token_a,
                token_b,
            },
            TokenInfo {
                symbol: row.get("symbol_a"),
                decimals: row.get::<i32, _>("decimals_a") as u8,
            },
            TokenInfo {
                symbol: row.get("symbol_b"),
                decimals: row.get::<i32, _>("decimals_b") as u8,
            },
        ));
    }
    Ok(pools)
}

/// Persisted swap events newer than the cutoff, for volume/fee aggregation.
pub async fn load_swap_events_since(
    db: &DbPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<SwapRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT tx_hash, pool_address, token_in, token_out, amount_in, amount_out,
                block_number, ts
         FROM {}.swap_events WHERE ts >= $1 ORDER BY block_number",
        SCHEMA
    ))
    .bind(cutoff)
    .fetch_all(db)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed = (
            H256::from_str(row.get::<String, _>("tx_hash").as_str()),
            Address::from_str(row.get::<String, _>("pool_address").as_str()),
            Address::from_str(row.get::<String, _>("token_in").as_str()),
            Address::from_str(row.get::<String, _>("token_out").as_str()),
            U256::from_dec_str(row.get::<String, _>("amount_in").as_str()),
            U256::from_dec_str(row.get::<String, _>("amount_out").as_str()),
        );
        let (Ok(tx_hash), Ok(pool), Ok(token_in), Ok(token_out), Ok(amount_in), Ok(amount_out)) =
            parsed
        else {
            warn!("⚠️ [Store] Skipping swap event row with unparseable fields");
            continue;
        };
        events.push(SwapRecord {
            tx_hash,
            pool,
            token_in,
            token_out,
            amount_in,
            amount_out,
            block_number: row.get::<i64, _>("block_number") as u64,
            timestamp: row.get("ts"),
        });
    }
    Ok(events)
}

/// The store operations a cycle drives, behind a seam so the scheduler can be
/// exercised against an in-memory store. `DbPool` is the production
/// implementation.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert_swap_events(&self, events: &[SwapRecord]) -> Result<u64>;
    async fn upsert_pools(&self, rows: &[PoolRow]) -> Result<()>;
    async fn delete_pools(&self, addresses: &[Address]) -> Result<()>;
    #[allow(clippy::too_many_arguments)]
    async fn insert_price_snapshot(
        &self,
        pool_address: Address,
        ts: DateTime<Utc>,
        price_a_per_b: f64,
        price_b_per_a: f64,
        reserve_a: U256,
        reserve_b: U256,
        throttle_seconds: i64,
    ) -> Result<bool>;
    async fn load_cursor(&self) -> Result<Option<u64>>;
    async fn save_cursor(&self, block_number: u64) -> Result<()>;
    async fn load_pools(&self) -> Result<Vec<(PairMeta, TokenInfo, TokenInfo)>>;
    async fn load_swap_events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SwapRecord>>;
}

#[async_trait]
impl SnapshotStore for DbPool {
    async fn insert_swap_events(&self, events: &[SwapRecord]) -> Result<u64> {
        insert_swap_events(self, events).await
    }

    async fn upsert_pools(&self, rows: &[PoolRow]) -> Result<()> {
        upsert_pools(self, rows).await
    }

    async fn delete_pools(&self, addresses: &[Address]) -> Result<()> {
        delete_pools(self, addresses).await
    }

    async fn insert_price_snapshot(
        &self,
        pool_address: Address,
        ts: DateTime<Utc>,
        price_a_per_b: f64,
        price_b_per_a: f64,
        reserve_a: U256,
        reserve_b: U256,
        throttle_seconds: i64,
    ) -> Result<bool> {
        insert_price_snapshot(
            self,
            pool_address,
            ts,
            price_a_per_b,
            price_b_per_a,
            reserve_a,
            reserve_b,
            throttle_seconds,
        )
        .await
    }

    async fn load_cursor(&self) -> Result<Option<u64>> {
        load_cursor(self).await
    }

    async fn save_cursor(&self, block_number: u64) -> Result<()> {
        save_cursor(self, block_number).await
    }

    async fn load_pools(&self) -> Result<Vec<(PairMeta, TokenInfo, TokenInfo)>> {
        load_pools(self).await
    }

    async fn load_swap_events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SwapRecord>> {
        load_swap_events_since(self, cutoff).await
    }
}
