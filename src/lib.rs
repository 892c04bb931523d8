//! Client side of a confidential prediction market: bets are encrypted
//! before they reach the ledger and only their owner can decrypt them again.

pub mod api;
pub mod clock;
pub mod eip712;
pub mod encoder;
pub mod error;
pub mod fhe;
pub mod ledger;
pub mod market;
pub mod registry;
pub mod relay;
pub mod rewards;
pub mod session;
pub mod settings;
pub mod wallet;
