//! Configuration management for the Opinion bot

use crate::exchange::{BrowseSettings, PinnedEvent};
use crate::retry::RetryPolicy;
use crate::types::OrderType;
use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the encrypted job store
    pub modules_db_path: String,

    /// Path to the report store
    pub report_db_path: String,

    /// Input file with one raw private key per line
    pub private_keys_path: String,

    /// Input file with one proxy per line (placeholders skipped)
    pub proxies_path: String,

    /// Maximum concurrently active account tasks
    pub threads: usize,

    /// Shuffle the eligible-job order before a run
    pub shuffle_wallets: bool,

    /// Inclusive range of jobs created per account
    pub job_count_range: (u32, u32),

    /// Cooldown after each account task, slept while its lock is held
    pub sleep_after_account_secs: (u64, u64),

    /// Trading behavior settings
    pub trade: TradeSettings,

    /// Event discovery settings
    pub browse: BrowseSettings,

    /// Telegram reporting target (optional)
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Trading flow settings
#[derive(Debug, Clone)]
pub struct TradeSettings {
    /// Order types drawn from when opening a position
    pub open_order_types: Vec<OrderType>,
    /// Order types drawn from when closing a position
    pub close_order_types: Vec<OrderType>,
    /// Pause between the buy and the sell of one job
    pub sleep_between_orders_secs: (u64, u64),
    /// Fixed USD order size range; (0, 0) switches to percentages
    pub amount_usd_range: (Decimal, Decimal),
    /// Order size as a percentage range of the live balance
    pub amount_percent_range: (Decimal, Decimal),
    /// Limit order behavior
    pub limit: LimitSettings,
    /// Whole-account retry policy
    pub retry: RetryPolicy,
}

/// Limit order pricing and repricing
#[derive(Debug, Clone)]
pub struct LimitSettings {
    /// Percent below the best bid for limit buys
    pub diff_price_buy: Decimal,
    /// Percent above the best ask for limit sells
    pub diff_price_sell: Decimal,
    /// Minutes to wait for a limit buy before repricing
    pub wait_buy_mins: u64,
    /// Minutes to wait for a limit sell before repricing
    pub wait_sell_mins: u64,
    /// Cap on cancel-and-resubmit cycles per order
    pub max_reprices: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            diff_price_buy: Decimal::ONE,
            diff_price_sell: Decimal::ONE,
            wait_buy_mins: 5,
            wait_sell_mins: 5,
            max_reprices: 8,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let modules_db_path = env::var("MODULES_DB_PATH")
            .unwrap_or_else(|_| "databases/modules.json".to_string());
        let report_db_path =
            env::var("REPORT_DB_PATH").unwrap_or_else(|_| "databases/report.json".to_string());
        let private_keys_path = env::var("PRIVATE_KEYS_PATH")
            .unwrap_or_else(|_| "input_data/private_keys.txt".to_string());
        let proxies_path =
            env::var("PROXIES_PATH").unwrap_or_else(|_| "input_data/proxies.txt".to_string());

        let threads = env::var("THREADS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(5);

        let shuffle_wallets = env::var("SHUFFLE_WALLETS")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let job_count_range = parse_u64_range("JOB_COUNT_RANGE", (1, 3));
        let job_count_range = (job_count_range.0 as u32, job_count_range.1 as u32);

        let sleep_after_account_secs = parse_u64_range("SLEEP_AFTER_ACCOUNT", (30, 120));

        let trade = TradeSettings {
            open_order_types: parse_order_types(
                "OPEN_ORDER_TYPES",
                &[OrderType::Market, OrderType::Limit],
            ),
            close_order_types: parse_order_types("CLOSE_ORDER_TYPES", &[OrderType::Market]),
            sleep_between_orders_secs: parse_u64_range("SLEEP_BETWEEN_ORDERS", (10, 30)),
            amount_usd_range: parse_decimal_range(
                "AMOUNT_USD_RANGE",
                (Decimal::ZERO, Decimal::ZERO),
            ),
            amount_percent_range: parse_decimal_range(
                "AMOUNT_PERCENT_RANGE",
                (Decimal::from(5), Decimal::from(10)),
            ),
            limit: LimitSettings {
                diff_price_buy: parse_decimal("LIMIT_DIFF_PRICE_BUY", Decimal::ONE),
                diff_price_sell: parse_decimal("LIMIT_DIFF_PRICE_SELL", Decimal::ONE),
                wait_buy_mins: parse_u64("LIMIT_WAIT_BUY_MINS", 5),
                wait_sell_mins: parse_u64("LIMIT_WAIT_SELL_MINS", 5),
                max_reprices: parse_u64("LIMIT_MAX_REPRICES", 8) as u32,
            },
            retry: RetryPolicy {
                max_attempts: parse_u64("RETRY_MAX_ATTEMPTS", 5) as u32,
                delay_range_secs: parse_u64_range("RETRY_DELAY_RANGE", (2, 5)),
            },
        };

        let browse = BrowseSettings {
            pinned: parse_pinned_events("PINNED_EVENTS"),
            min_event_percent: parse_decimal("MIN_EVENT_PERCENT", Decimal::from(20)),
            max_spread_percent: parse_decimal("MAX_SPREAD_PERCENT", Decimal::from(2)),
        };

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        let telegram_chat_id = env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());

        Ok(Self {
            modules_db_path,
            report_db_path,
            private_keys_path,
            proxies_path,
            threads,
            shuffle_wallets,
            job_count_range,
            sleep_after_account_secs,
            trade,
            browse,
            telegram_bot_token,
            telegram_chat_id,
        })
    }
}

fn parse_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_decimal(name: &str, default: Decimal) -> Decimal {
    env::var(name)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
        .unwrap_or(default)
}

/// Parse a `"min,max"` pair, tolerating a single value for a fixed range
fn parse_u64_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let Ok(raw) = env::var(name) else {
        return default;
    };
    match split_pair(&raw) {
        Some((lo, hi)) => match (lo.parse(), hi.parse()) {
            (Ok(lo), Ok(hi)) => (lo, hi),
            _ => default,
        },
        None => match raw.trim().parse() {
            Ok(single) => (single, single),
            Err(_) => default,
        },
    }
}

fn parse_decimal_range(name: &str, default: (Decimal, Decimal)) -> (Decimal, Decimal) {
    let Ok(raw) = env::var(name) else {
        return default;
    };
    match split_pair(&raw) {
        Some((lo, hi)) => match (Decimal::from_str(lo), Decimal::from_str(hi)) {
            (Ok(lo), Ok(hi)) => (lo, hi),
            _ => default,
        },
        None => match Decimal::from_str(raw.trim()) {
            Ok(single) => (single, single),
            Err(_) => default,
        },
    }
}

fn split_pair(raw: &str) -> Option<(&str, &str)> {
    raw.split_once(',').map(|(lo, hi)| (lo.trim(), hi.trim()))
}

fn parse_order_types(name: &str, default: &[OrderType]) -> Vec<OrderType> {
    let Some(raw) = env::var(name).ok().filter(|s| !s.trim().is_empty()) else {
        return default.to_vec();
    };
    let types: Vec<OrderType> = raw
        .split(',')
        .filter_map(|t| match t.trim().to_lowercase().as_str() {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            _ => None,
        })
        .collect();
    if types.is_empty() {
        default.to_vec()
    } else {
        types
    }
}

/// Parse `link` or `link|vote` entries separated by `;`
fn parse_pinned_events(name: &str) -> Vec<PinnedEvent> {
    let Ok(raw) = env::var(name) else {
        return Vec::new();
    };
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('|') {
            Some((link, vote)) => PinnedEvent {
                link: link.trim().to_string(),
                vote: vote.trim().parse().ok(),
            },
            None => PinnedEvent {
                link: entry.to_string(),
                vote: None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_parsing() {
        env::set_var("TEST_RANGE_PAIR", "30, 120");
        assert_eq!(parse_u64_range("TEST_RANGE_PAIR", (0, 0)), (30, 120));

        env::set_var("TEST_RANGE_SINGLE", "42");
        assert_eq!(parse_u64_range("TEST_RANGE_SINGLE", (0, 0)), (42, 42));

        assert_eq!(parse_u64_range("TEST_RANGE_MISSING", (1, 2)), (1, 2));

        env::set_var("TEST_RANGE_BAD", "a,b");
        assert_eq!(parse_u64_range("TEST_RANGE_BAD", (7, 9)), (7, 9));
    }

    #[test]
    fn test_order_type_parsing() {
        env::set_var("TEST_ORDER_TYPES", "market, limit");
        assert_eq!(
            parse_order_types("TEST_ORDER_TYPES", &[]),
            vec![OrderType::Market, OrderType::Limit]
        );

        env::set_var("TEST_ORDER_TYPES_BAD", "stop");
        assert_eq!(
            parse_order_types("TEST_ORDER_TYPES_BAD", &[OrderType::Market]),
            vec![OrderType::Market]
        );
    }

    #[test]
    fn test_pinned_event_parsing() {
        env::set_var("TEST_PINNED", "?topicId=1|2 ; ?topicId=9&type=multi");
        let pinned = parse_pinned_events("TEST_PINNED");
        assert_eq!(pinned.len(), 2);
        assert_eq!(pinned[0].link, "?topicId=1");
        assert_eq!(pinned[0].vote, Some(2));
        assert_eq!(pinned[1].link, "?topicId=9&type=multi");
        assert_eq!(pinned[1].vote, None);
    }
}
