//! Exchange API collaborator
//!
//! The trader only ever talks to this trait; the HTTP specifics live in
//! [`http`]. Test doubles implement the trait to script outcomes and assert
//! concurrency properties.

mod http;

pub use http::{BrowseSettings, HttpExchange, PinnedEvent};

use anyhow::Result;
use rust_decimal::Decimal;

/// Raised when the exchange answers with a WAF challenge instead of data.
/// Mapped to the `cloudflare` job status so the entry is requeued on the
/// next run instead of retried immediately.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("blocked by WAF challenge")]
pub struct CloudflareBlock;

/// A tradeable event (or child of a multi-event), reduced to what order
/// placement needs
#[derive(Debug, Clone)]
pub struct EventInfo {
    /// Display name; parent title prefixed for children
    pub name: String,
    pub topic_id: i64,
    pub question_id: String,
    /// [yes, no] current buy prices
    pub prices: [Decimal; 2],
    /// [yes, no] position token ids, also used as book symbols
    pub tokens: [String; 2],
    /// [yes, no] outcome labels
    pub labels: [String; 2],
    /// Child of a multi-event (order lookups key on the parent topic)
    pub is_child: bool,
    /// 1-based outcome side forced by a pinned link or a reprice cycle
    pub force_vote: Option<u8>,
}

/// Lookup query for re-finding the event backing an existing position
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Relative event link, e.g. `?topicId=123&type=multi`
    pub link: String,
    pub event_name: String,
    /// 1-based outcome side to force
    pub vote: u8,
}

/// Price levels on one side of the book, best first
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Ascending ask prices
    pub asks: Vec<Decimal>,
    /// Descending bid prices
    pub bids: Vec<Decimal>,
}

/// Account profile as the trader consumes it
#[derive(Debug, Clone)]
pub struct Profile {
    pub balance: Decimal,
    pub total_profit: Decimal,
    pub volume: Decimal,
    /// Exchange-side multi-signed wallet for the trading chain
    pub proxy_wallet: Option<String>,
}

/// An open position worth acting on
#[derive(Debug, Clone)]
pub struct Position {
    pub topic_id: i64,
    pub multi_topic_id: Option<i64>,
    pub topic_title: String,
    pub outcome: String,
    /// 1-based outcome side
    pub outcome_side: u8,
    pub token_id: String,
    pub token_amount: Decimal,
    /// Current USD value
    pub value: Decimal,
}

/// A resting limit order
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub trans_no: String,
    pub title: String,
}

/// Fill state of a submitted order
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub trans_no: String,
    pub filled: Decimal,
    pub total: Decimal,
    pub price: Decimal,
    pub total_price: Decimal,
}

impl OrderStatus {
    /// Filled when both sides of the fraction agree to the cent
    pub fn is_filled(&self) -> bool {
        self.filled.round_dp(2) == self.total.round_dp(2)
    }
}

/// A fully signed order ready for submission
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub salt: String,
    /// Proxy wallet placing the order
    pub maker: String,
    /// EOA that signed it
    pub signer: String,
    pub token_id: String,
    /// 1e18-scaled maker amount as a decimal string
    pub maker_amount: String,
    /// 1e18-scaled taker amount as a decimal string
    pub taker_amount: String,
    /// 0 = buy, 1 = sell
    pub side: u8,
    pub signature: String,
    pub topic_id: i64,
    /// Slippage guard the exchange applies to market orders
    pub safe_rate: String,
    /// Limit price as a decimal string, "0" for market orders
    pub price: String,
}

/// Which order listing to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderQueryKind {
    Market,
    Limit,
}

/// The surface the trader drives. One instance per account-task, bound to
/// that account's proxy and session.
#[allow(async_fn_in_trait)]
pub trait ExchangeApi: Send + Sync {
    /// Whether the wallet has completed platform registration
    async fn is_registered(&self) -> Result<bool>;

    /// Exchange SIWE login; implementations capture the session token
    async fn login(&self, message: &str, signature: &str, timestamp: i64, nonce: u64)
        -> Result<()>;

    async fn profile(&self) -> Result<Profile>;

    /// Whether the proxy wallet has exchange spending approval
    async fn is_approved(&self, proxy_wallet: &str) -> Result<bool>;

    /// Pick a tradeable event: resolve the query when given, otherwise browse
    /// per the configured filters. None when nothing qualifies.
    async fn pick_event(&self, query: Option<&EventQuery>) -> Result<Option<EventInfo>>;

    /// Book depth for one outcome of an event (0 = yes, 1 = no)
    async fn order_book(&self, event: &EventInfo, choice: usize) -> Result<OrderBook>;

    /// Submit a signed order, returning its transaction number
    async fn place_order(&self, order: &OrderRequest) -> Result<String>;

    /// Find one submitted order by transaction number
    async fn find_order(
        &self,
        kind: OrderQueryKind,
        topic_id: i64,
        is_parent: bool,
        trans_no: &str,
    ) -> Result<Option<OrderStatus>>;

    /// All resting orders of the given kind
    async fn open_orders(&self, kind: OrderQueryKind) -> Result<Vec<OpenOrder>>;

    /// All open positions
    async fn positions(&self) -> Result<Vec<Position>>;

    /// One position by topic and outcome side
    async fn position(&self, topic_id: i64, outcome_side: u8) -> Result<Option<Position>>;

    /// Volume leaderboard rank
    async fn rank(&self) -> Result<i64>;

    async fn cancel_order(&self, trans_no: &str) -> Result<()>;

    /// Release network sessions; best-effort
    async fn close(&self);
}
