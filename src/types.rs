//! Core types shared across the job store, scheduler, and trader

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a single queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for the next scheduler pass
    ToRun,
    /// Finished with an error; requeued by the explicit reset
    Failed,
    /// Finished successfully
    Completed,
    /// Hit a WAF challenge; requeued by the explicit reset
    Cloudflare,
}

impl JobStatus {
    /// Statuses that the reset operation moves back to `ToRun`
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cloudflare)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::ToRun => write!(f, "to_run"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cloudflare => write!(f, "cloudflare"),
        }
    }
}

/// Result of one account-task, mapped from the trader at the collaborator
/// boundary. Replaces the loosely-typed `true`/`"completed"` tags the store
/// used to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// Transient WAF block; the job keeps its slot and is retried on the
    /// next invocation after the explicit reset
    Cloudflare,
}

impl RunOutcome {
    pub fn job_status(&self) -> JobStatus {
        match self {
            RunOutcome::Completed => JobStatus::Completed,
            RunOutcome::Failed => JobStatus::Failed,
            RunOutcome::Cloudflare => JobStatus::Cloudflare,
        }
    }
}

/// Selected run mode. Mode 1 walks every job; modes 2 and 3 touch each
/// wallet exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Open a position and close it again (per-job)
    BuySell,
    /// Cancel open orders and liquidate every position (per-account)
    SellAll,
    /// Collect account statistics (per-account)
    Stats,
}

impl RunMode {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(RunMode::BuySell),
            2 => Some(RunMode::SellAll),
            3 => Some(RunMode::Stats),
            _ => None,
        }
    }

    /// Whether this mode drains one job per wallet instead of the full queue
    pub fn unique_wallets(&self) -> bool {
        matches!(self, RunMode::SellAll | RunMode::Stats)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::BuySell => write!(f, "buy-sell"),
            RunMode::SellAll => write!(f, "sell-all"),
            RunMode::Stats => write!(f, "stats"),
        }
    }
}

/// Order execution style picked per order from the configured pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire encoding used by the exchange (0 = buy, 1 = sell)
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// One runnable job row produced by `Database::list_eligible`, carrying
/// everything a task needs without touching the store again.
#[derive(Debug, Clone)]
pub struct EligibleJob {
    /// Store key; the account's stable identity
    pub encrypted_key: String,
    /// Decrypted private key for the wallet signer
    pub private_key: String,
    /// Wallet address derived at creation time
    pub address: String,
    /// Outbound proxy assigned at creation time
    pub proxy: Option<String>,
    /// Position of the job inside the account's module list
    pub module_index: usize,
    pub module_name: String,
    /// Whether this is the account's last listed job
    pub last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_format() {
        assert_eq!(serde_json::to_string(&JobStatus::ToRun).unwrap(), "\"to_run\"");
        assert_eq!(serde_json::to_string(&JobStatus::Cloudflare).unwrap(), "\"cloudflare\"");

        let status: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, JobStatus::Failed);
    }

    #[test]
    fn test_transient_failures() {
        assert!(JobStatus::Failed.is_transient_failure());
        assert!(JobStatus::Cloudflare.is_transient_failure());
        assert!(!JobStatus::Completed.is_transient_failure());
        assert!(!JobStatus::ToRun.is_transient_failure());
    }

    #[test]
    fn test_mode_wallet_granularity() {
        assert!(!RunMode::BuySell.unique_wallets());
        assert!(RunMode::SellAll.unique_wallets());
        assert!(RunMode::Stats.unique_wallets());
        assert_eq!(RunMode::from_id(4), None);
    }
}
