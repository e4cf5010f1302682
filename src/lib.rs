//! Live subscriptions to remote chain storage: balances, locks and reserved amounts of the
//! selected account, multiplexed per chain, decoded and published as balance events.

pub mod config;
pub mod domain;
pub mod infra;
pub mod services;
