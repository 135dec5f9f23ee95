// src/tokens.rs
//
// Read-through token metadata cache: static known-token table first, then the
// in-memory cache, then the token contract itself. Unreadable metadata is
// never fatal: the fallback is 18 decimals and a truncated-address symbol.

use crate::chain::ChainView;
use crate::settings::KnownToken;
use dashmap::DashMap;
use ethers::types::Address;
use log::{info, warn};

pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
}

/// Pseudo-symbol for tokens whose symbol() call fails or reverts: the first
/// four bytes of the address, hex-encoded.
pub fn pseudo_symbol(token: Address) -> String {
    format!("0x{}", hex::encode(&token.as_bytes()[..4]))
}

pub struct TokenCache {
    inner: DashMap<Address, TokenInfo>,
}

impl TokenCache {
    /// Seed the cache from the static known-token table. Entries with an
    /// unparseable address are skipped with a warning, not fatal.
    pub fn from_known(known: &[KnownToken]) -> Self {
        let inner = DashMap::new();
        for entry in known {
            match entry.address.parse::<Address>() {
                Ok(addr) => {
                    inner.insert(
                        addr,
                        TokenInfo {
                            symbol: entry.symbol.clone(),
                            decimals: entry.decimals,
                        },
                    );
                }
                Err(_) => {
                    warn!(
                        "TokenCache: Skipping known-token entry with bad address {}",
                        entry.address
                    );
                }
            }
        }
        if !inner.is_empty() {
            info!("TokenCache: Seeded {} tokens from static table", inner.len());
        }
        Self { inner }
    }

    pub fn get(&self, token: &Address) -> Option<TokenInfo> {
        self.inner.get(token).map(|e| e.value().clone())
    }

    /// Cached decimals, defaulting to 18 for unknown tokens. Token-level
    /// lookups are cache-backed, so this never races across cycles.
    pub fn decimals(&self, token: &Address) -> u8 {
        self.inner
            .get(token)
            .map(|e| e.decimals)
            .unwrap_or(DEFAULT_DECIMALS)
    }

    /// Read-through resolution against the token contract. Failures degrade
    /// to the pseudo-symbol / default-decimals fallback and are cached so a
    /// permanently broken token is not re-queried every cycle.
    pub async fn resolve<C: ChainView + ?Sized>(&self, chain: &C, token: Address) -> TokenInfo {
        if let Some(info) = self.get(&token) {
            return info;
        }
        let symbol = match chain.token_symbol(token).await {
            Ok(s) => s,
            Err(e) => {
                warn!("TokenCache: symbol() failed for {:?}: {}", token, e);
                pseudo_symbol(token)
            }
        };
        let decimals = match chain.token_decimals(token).await {
            Ok(d) => d,
            Err(e) => {
                warn!("TokenCache: decimals() failed for {:?}: {}", token, e);
                DEFAULT_DECIMALS
            }
        };
        let info = TokenInfo { symbol, decimals };
        self.inner.insert(token, info.clone());
        info
    }

    /// Insert metadata recovered from the store at startup.
    pub fn insert(&self, token: Address, info: TokenInfo) {
        self.inner.entry(token).or_insert(info);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
