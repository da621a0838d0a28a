//! Wallet balance view.
//!
//! Keeps the last known wallet balance, exchange rate and blockchain sync
//! status, and recomposes a single [`composer::ViewState`] whenever any of
//! them changes.

pub mod api;
pub mod balance;
pub mod composer;
pub mod config;
pub mod errors;
pub mod producers;
pub mod render;
pub mod sync;
pub mod ticker;
