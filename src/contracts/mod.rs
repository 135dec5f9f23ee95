// Contracts Module - Read-only ABIs

pub mod erc20;
pub mod i_exchange_factory;
pub mod i_exchange_pair;

// Public exports
pub use erc20::Erc20;
pub use i_exchange_factory::{IExchangeFactory, PairCreatedFilter};
pub use i_exchange_pair::{IExchangePair, SwapFilter};
