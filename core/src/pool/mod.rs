//! Shield pool client: share math, balances, deposits, withdrawals and yield
//! sync against the ledger.

pub mod client;
pub mod feed;
pub mod math;

pub use client::{Balance, DebitPlan, DepositReceipt, PoolClient, PoolSnapshot, WithdrawReceipt};
pub use feed::{CachedFeed, FeedReading, HttpYieldFeed, StaticYieldFeed, YieldFeed, YieldQuote};
