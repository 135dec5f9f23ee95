//! # AMM Indexer
//!
//! A continuous indexer for a factory-spawned constant-product exchange. It
//! reconciles on-chain truth against pool contracts whose cached bookkeeping
//! is known to drift, resolves USD valuations across the pool graph, and
//! writes idempotent, throttled snapshots to a relational store for
//! downstream consumers (dashboards, charts).
//!
//! ## Overview
//!
//! Each polling cycle runs, in order:
//!
//! - **Discovery**: enumerate pools from the factory and pick up
//!   `PairCreated` events inside the cycle's block range
//! - **Extraction**: fetch and normalize `Swap` logs into canonical records
//! - **Reconciliation**: read authoritative reserves as ERC-20 balances of
//!   the pool address, never the pool's own cached reserve counters
//! - **Pricing**: resolve USD prices by walking the pool graph out from the
//!   stable asset (fixed at 1.0)
//! - **Aggregation**: TVL from current reserves, volume/fees from persisted
//!   swap events
//! - **Persistence**: idempotent upserts plus throttled price snapshots
//!
//! The block cursor advances only after a cycle completes cleanly; any
//! failure retries the same range after a bounded-jitter backoff. No error in
//! normal operation terminates the process.

// Core Types
/// Pool metadata and factory/pair discovery
pub mod registry;
/// Token metadata read-through cache
pub mod tokens;

// Chain Access
/// Timeout-wrapped RPC facade and the ground-truth balance reader interface
pub mod chain;
/// Smart contract ABIs (read-only)
pub mod contracts;

// Pipeline
/// Swap log extraction and normalization
pub mod extractor;
/// Balance-level reserve reconciliation
pub mod reconciler;
/// USD price discovery over the pool graph
pub mod oracle;
/// TVL, volume and fee aggregation
pub mod aggregator;
/// Polling orchestrator and cycle state machine
pub mod scheduler;

// Infrastructure
/// PostgreSQL persistence (pools, swap events, price history, cursor)
pub mod database;
/// Bounded-jitter retry policy
pub mod backoff;
/// Decimal normalization helpers
pub mod normalization;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use chain::{BalanceReader, ChainReader, ChainView};
pub use database::SnapshotStore;
pub use registry::PoolRegistry;
pub use scheduler::Scheduler;
pub use settings::Settings;
