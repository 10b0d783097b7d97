//! Opinion Trading Bot Library
//!
//! Automates the Opinion prediction market for a fleet of wallet-controlled
//! accounts: an encrypted on-disk job store tracks what every account still
//! owes, a per-address lock registry keeps each wallet to one in-flight task,
//! and a bounded scheduler drains the queue while per-account reports are
//! accumulated and shipped to Telegram at each drain.

pub mod config;
pub mod db;
pub mod exchange;
pub mod locks;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod trader;
pub mod types;
pub mod wallet;

pub use config::{Config, LimitSettings, TradeSettings};
pub use db::{Database, StoreError, StoreSummary};
pub use exchange::{BrowseSettings, ExchangeApi, HttpExchange, PinnedEvent};
pub use locks::AddressLocks;
pub use notifier::Notifier;
pub use scheduler::{AccountAction, Scheduler};
pub use trader::{OpinionAction, Trader};
pub use types::{EligibleJob, JobStatus, RunMode, RunOutcome};
pub use wallet::{address_from_private_key, MasterKey, Wallet};
