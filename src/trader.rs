//! Account trading flows against the Opinion exchange
//!
//! One `Trader` per account-task. Every flow starts from a SIWE login, then
//! runs the selected mode body. Limit orders that stall are repriced through
//! an explicit bounded loop rather than resubmitting recursively, so the
//! retry ceiling is a number you can point at.

use crate::config::{LimitSettings, TradeSettings};
use crate::db::Database;
use crate::exchange::{
    BrowseSettings, CloudflareBlock, EventInfo, EventQuery, ExchangeApi, HttpExchange,
    OrderQueryKind, OrderRequest, OrderStatus, Position, Profile,
};
use crate::retry;
use crate::scheduler::AccountAction;
use crate::types::{EligibleJob, OrderSide, OrderType, RunMode, RunOutcome};
use crate::wallet::{OrderParams, Wallet, CHAIN_ID};
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

/// Fill poll cadence
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Authenticated session context established by `login`
struct Session {
    profile: Profile,
    proxy_wallet: String,
}

/// A filled order paired with the event it traded
struct PlacedFill {
    status: OrderStatus,
    event: EventInfo,
    /// Outcome index traded (0 = yes, 1 = no)
    choice: usize,
}

/// Per-account trading driver
pub struct Trader<'a, E: ExchangeApi> {
    exchange: &'a E,
    wallet: &'a Wallet,
    db: &'a Database,
    encrypted_key: &'a str,
    settings: &'a TradeSettings,
}

impl<'a, E: ExchangeApi> Trader<'a, E> {
    pub fn new(
        exchange: &'a E,
        wallet: &'a Wallet,
        db: &'a Database,
        encrypted_key: &'a str,
        settings: &'a TradeSettings,
    ) -> Self {
        Self {
            exchange,
            wallet,
            db,
            encrypted_key,
            settings,
        }
    }

    /// Run one mode body with bounded retries. WAF blocks map to the
    /// `Cloudflare` outcome; store failures pass through untouched.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome> {
        let result = retry::retry_async(&self.settings.retry, "account", || self.attempt(mode)).await;

        match result {
            Ok(()) => Ok(RunOutcome::Completed),
            Err(err) if err.downcast_ref::<CloudflareBlock>().is_some() => {
                warn!("{} | {}", self.wallet.address, err);
                Ok(RunOutcome::Cloudflare)
            }
            Err(err) => Err(err),
        }
    }

    async fn attempt(&self, mode: RunMode) -> Result<()> {
        let session = self.login().await?;
        match mode {
            RunMode::BuySell => self.buy_sell(&session).await,
            RunMode::SellAll => self.sell_all(&session).await,
            RunMode::Stats => self.account_stats(&session).await,
        }
    }

    /// SIWE login plus the platform preconditions every flow needs
    async fn login(&self) -> Result<Session> {
        if !self.exchange.is_registered().await? {
            bail!("User is not registered");
        }

        let now = Utc::now();
        let nonce = rand::thread_rng().gen_range(65_535u64..=0xffff_ffff_ffff);
        let message = format!(
            "app.opinion.trade wants you to sign in with your Ethereum account:\n\
             {address}\n\n\
             Welcome to opinion.trade! By proceeding, you agree to our Privacy Policy and Terms of Use.\n\n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {CHAIN_ID}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}",
            address = self.wallet.address,
            uri = "https://app.opinion.trade",
            issued_at = now.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        );
        let signature = self.wallet.sign_text(&message)?;
        let signature = signature.strip_prefix("0x").unwrap_or(&signature);

        self.exchange
            .login(&message, signature, now.timestamp(), nonce)
            .await?;

        let profile = self.exchange.profile().await?;
        let proxy_wallet = profile
            .proxy_wallet
            .clone()
            .ok_or_else(|| anyhow!("No proxy wallet created"))?;
        if !self.exchange.is_approved(&proxy_wallet).await? {
            bail!("Wallet is not approved");
        }

        Ok(Session {
            profile,
            proxy_wallet,
        })
    }

    /// Mode 1: open a position, wait out the inter-order pause, close it
    async fn buy_sell(&self, session: &Session) -> Result<()> {
        let open_type = pick_type(&self.settings.open_order_types);
        let buy = self
            .place_position_order(session, OrderSide::Buy, open_type, None, None, None)
            .await?;

        let (lo, hi) = self.settings.sleep_between_orders_secs;
        let pause = rand::thread_rng().gen_range(lo.min(hi)..=hi.max(lo));
        sleep(Duration::from_secs(pause)).await;

        let close_type = pick_type(&self.settings.close_order_types);
        let sell = self
            .place_position_order(
                session,
                OrderSide::Sell,
                close_type,
                Some(buy.event.clone()),
                Some(&buy),
                None,
            )
            .await?;

        let profit = (sell.status.total_price - buy.status.total_price).round_dp(2);
        let volume = (sell.status.total_price + buy.status.total_price).round_dp(2);
        self.db
            .append_report_line(
                self.encrypted_key,
                &format!("\n🎰 <b>Profit {profit}$\n📌 Volume {volume}$</b>"),
                None,
            )
            .await?;

        Ok(())
    }

    /// Mode 2: cancel resting limit orders, then liquidate every position
    /// worth acting on
    async fn sell_all(&self, session: &Session) -> Result<()> {
        let mut sold_any = false;

        for order in self.exchange.open_orders(OrderQueryKind::Limit).await? {
            self.exchange.cancel_order(&order.trans_no).await?;
            info!("{} | Cancelled order in \"{}\"", self.wallet.address, order.title);
            self.db
                .append_report_line(
                    self.encrypted_key,
                    &format!("cancel order \"{}\"", order.title),
                    Some(true),
                )
                .await?;
            sold_any = true;
        }

        for position in self.exchange.positions().await? {
            if position.value < Decimal::ONE {
                continue;
            }
            let close_type = pick_type(&self.settings.close_order_types);
            self.place_position_order(
                session,
                OrderSide::Sell,
                close_type,
                None,
                None,
                Some(position),
            )
            .await?;
            sold_any = true;
        }

        if !sold_any {
            info!("{} | No positions found to sell", self.wallet.address);
            self.db
                .append_report_line(self.encrypted_key, "no positions found to sell", Some(true))
                .await?;
        }

        Ok(())
    }

    /// Mode 3: collect balance, volume, rank and open-position stats
    async fn account_stats(&self, session: &Session) -> Result<()> {
        let balance = session.profile.balance.round_dp(2);
        let profit = session.profile.total_profit.round_dp(2);
        let volume = session.profile.volume.round_dp(2);

        let (positions, rank) = futures::join!(self.exchange.positions(), self.exchange.rank());
        let positions = positions?;
        let rank = rank?;
        let total_positions = positions
            .iter()
            .filter(|p| p.value >= Decimal::ONE)
            .count();

        info!(
            "{} | Rank {} | Volume {}$ | Positions {} | Balance {}$ | Profit {}$",
            self.wallet.address, rank, volume, total_positions, balance, profit
        );
        self.db
            .append_report_line(
                self.encrypted_key,
                &format!(
                    "💎 Rank: {rank}\n📈 Volume: {volume}$\n📌 Positions: {total_positions}\n\
                     💰 Total Balance: {balance}$\n💵 Profit: {profit}$\n"
                ),
                None,
            )
            .await?;

        Ok(())
    }

    /// Place one order and wait for its fill.
    ///
    /// Limit orders past their deadline are repriced: cancel, recompute from
    /// the fresh book, resubmit on the same outcome side. The loop is capped
    /// by `limit.max_reprices`; the accumulated state is just the cycle count
    /// and the resolved (event, choice, position).
    async fn place_position_order(
        &self,
        session: &Session,
        side: OrderSide,
        order_type: OrderType,
        event: Option<EventInfo>,
        prior_buy: Option<&PlacedFill>,
        position: Option<Position>,
    ) -> Result<PlacedFill> {
        // Resolve the traded event, outcome side, and (for sells) the backing
        // position once; these stay fixed across reprice cycles.
        let (event, choice, position) = match side {
            OrderSide::Buy => {
                let event = match event {
                    Some(event) => event,
                    None => self
                        .exchange
                        .pick_event(None)
                        .await?
                        .ok_or_else(|| anyhow!("No events found"))?,
                };
                let choice = match event.force_vote {
                    Some(vote) => (vote.max(1) as usize - 1).min(1),
                    None => rand::thread_rng().gen_range(0..=1),
                };
                (event, choice, None)
            }
            OrderSide::Sell => {
                if let Some(position) = position {
                    let choice = (position.outcome_side.max(1) as usize - 1).min(1);
                    let event = self
                        .exchange
                        .pick_event(Some(&EventQuery {
                            link: position_link(&position),
                            event_name: position.topic_title.clone(),
                            vote: position.outcome_side,
                        }))
                        .await?
                        .ok_or_else(|| {
                            anyhow!("Failed to find event \"{}\"", position.topic_title)
                        })?;
                    (event, choice, Some(position))
                } else if let (Some(event), Some(prior)) = (event, prior_buy) {
                    let choice = prior.choice;
                    let position = self
                        .exchange
                        .position(event.topic_id, choice as u8 + 1)
                        .await?
                        .ok_or_else(|| {
                            anyhow!("Failed to find active position \"{}\"", event.name)
                        })?;
                    (event, choice, Some(position))
                } else {
                    bail!("A position or a prior buy is required for a sell");
                }
            }
        };

        let label = match &position {
            Some(position) if !position.outcome.is_empty() => position.outcome.clone(),
            _ => event.labels[choice].clone(),
        };
        let action_name = match side {
            OrderSide::Buy => "Bidding",
            OrderSide::Sell => "Selling",
        };

        let limit = &self.settings.limit;
        let wait = Duration::from_secs(
            60 * match side {
                OrderSide::Buy => limit.wait_buy_mins,
                OrderSide::Sell => limit.wait_sell_mins,
            },
        );

        // Sell sizes come from the backing position and stay fixed; buys are
        // re-sized from the live balance every cycle
        let sell_amounts = position
            .as_ref()
            .map(|p| (round_cut(p.token_amount, 2), round_cut(p.value, 2)));

        let mut cycle = 0u32;
        loop {
            let (mut amount, usd_amount) = match sell_amounts {
                Some(amounts) => amounts,
                None => {
                    let amount = self.order_amount().await?;
                    (amount, amount)
                }
            };

            let book = self.exchange.order_book(&event, choice).await?;
            let (price, taker_amount) = match order_type {
                OrderType::Market => {
                    let top = match side {
                        OrderSide::Buy => book.asks.first(),
                        OrderSide::Sell => book.bids.first(),
                    };
                    (*top.ok_or_else(|| anyhow!("Empty order book"))?, Decimal::ZERO)
                }
                OrderType::Limit => {
                    let price = limit_price(limit, side, &book)?;
                    match side {
                        OrderSide::Buy => {
                            let taker = round_cut(amount / price, 2);
                            amount = taker * price;
                            (price, taker)
                        }
                        OrderSide::Sell => (price, amount * price),
                    }
                }
            };

            let request = self.build_order(session, &event, choice, side, order_type, amount, taker_amount, price)?;

            info!(
                "{} | {} {} USDT for {} in {} at {}¢",
                self.wallet.address,
                action_name,
                usd_amount,
                label,
                event.name,
                (price * Decimal::ONE_HUNDRED).round_dp(2),
            );
            let trans_no = self.exchange.place_order(&request).await?;

            let kind = match order_type {
                OrderType::Market => OrderQueryKind::Market,
                OrderType::Limit => OrderQueryKind::Limit,
            };
            let mut deadline = Instant::now() + wait;

            info!(
                "{} | Waiting for {} {} order to fill",
                self.wallet.address, order_type, side
            );
            loop {
                let found = self
                    .exchange
                    .find_order(kind, event.topic_id, event.is_child, &trans_no)
                    .await?
                    .ok_or_else(|| anyhow!("Failed to find order {trans_no}"))?;

                if found.is_filled() {
                    let final_price = (found.price * Decimal::ONE_HUNDRED).round_dp(2);
                    info!(
                        "{} | Filled {} {} order for {}$ at {}¢",
                        self.wallet.address,
                        order_type,
                        side,
                        round_cut(found.total_price, 2),
                        final_price
                    );
                    self.db
                        .append_report_line(
                            self.encrypted_key,
                            &format!(
                                "{order_type} {side} «{label}» for {usd_amount}$ at {final_price}¢ in {}",
                                event.name
                            ),
                            Some(true),
                        )
                        .await?;
                    return Ok(PlacedFill {
                        status: found,
                        event,
                        choice,
                    });
                }

                if order_type == OrderType::Limit && Instant::now() > deadline {
                    let fresh = self.exchange.order_book(&event, choice).await?;
                    if limit_price(limit, side, &fresh)? == price {
                        info!(
                            "{} | Limit order unfilled but price unchanged, waiting again",
                            self.wallet.address
                        );
                        deadline = Instant::now() + wait;
                    } else {
                        self.exchange.cancel_order(&trans_no).await?;
                        info!(
                            "{} | Limit order unfilled, repricing \"{}\"",
                            self.wallet.address, event.name
                        );
                        cycle += 1;
                        if cycle > limit.max_reprices {
                            bail!(
                                "Limit order not filled after {} reprices",
                                limit.max_reprices
                            );
                        }
                        break;
                    }
                }

                sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Sign the order payload for submission
    fn build_order(
        &self,
        session: &Session,
        event: &EventInfo,
        choice: usize,
        side: OrderSide,
        order_type: OrderType,
        amount: Decimal,
        taker_amount: Decimal,
        price: Decimal,
    ) -> Result<OrderRequest> {
        let token = &event.tokens[choice];
        let maker: Address = session
            .proxy_wallet
            .parse()
            .context("Invalid proxy wallet address")?;
        let salt = rand::thread_rng().gen_range(1u64..=i64::MAX as u64);

        let params = OrderParams {
            salt: U256::from(salt),
            maker,
            token_id: U256::from_str(token).context("Invalid token id")?,
            maker_amount: to_wei(amount)?,
            taker_amount: to_wei(taker_amount)?,
            side: side.as_u8(),
        };
        let signature = self.wallet.sign_order(&params)?;

        let is_market_buy = side == OrderSide::Buy && order_type == OrderType::Market;
        Ok(OrderRequest {
            salt: salt.to_string(),
            maker: session.proxy_wallet.clone(),
            signer: self.wallet.address.clone(),
            token_id: token.clone(),
            maker_amount: params.maker_amount.to_string(),
            taker_amount: params.taker_amount.to_string(),
            side: side.as_u8(),
            signature,
            topic_id: event.topic_id,
            safe_rate: if is_market_buy { "0" } else { "0.05" }.to_string(),
            price: match order_type {
                OrderType::Limit => price.normalize().to_string(),
                OrderType::Market => "0".to_string(),
            },
        })
    }

    /// Pick the order size: a fixed USD range when configured, otherwise a
    /// percentage of the live balance. Truncated to cents.
    async fn order_amount(&self) -> Result<Decimal> {
        let balance = self.exchange.profile().await?.balance;
        let (lo, hi) = self.settings.amount_usd_range;

        let amount = if !lo.is_zero() || !hi.is_zero() {
            if lo > balance {
                bail!(
                    "Not enough balance: need {} have {}",
                    lo,
                    balance.round_dp(2)
                );
            }
            uniform_decimal(lo, hi.min(balance))
        } else {
            let (plo, phi) = self.settings.amount_percent_range;
            let percent = uniform_decimal(plo, phi) / Decimal::ONE_HUNDRED;
            balance * percent
        };

        Ok(round_cut(amount, 2))
    }
}

/// Production account action: a fresh HTTP session and wallet per entry,
/// with the trader driving the selected mode. Sessions are released before
/// the result reaches the scheduler, whatever the outcome.
pub struct OpinionAction {
    db: Arc<Database>,
    trade: TradeSettings,
    browse: BrowseSettings,
}

impl OpinionAction {
    pub fn new(db: Arc<Database>, trade: TradeSettings, browse: BrowseSettings) -> Self {
        Self { db, trade, browse }
    }
}

impl AccountAction for OpinionAction {
    fn run(
        &self,
        entry: &EligibleJob,
        mode: RunMode,
    ) -> impl Future<Output = Result<RunOutcome>> + Send {
        let entry = entry.clone();
        async move {
            let exchange =
                HttpExchange::new(entry.proxy.as_deref(), &entry.address, self.browse.clone())?;
            let wallet = Wallet::new(&entry.private_key)?;
            let trader = Trader::new(
                &exchange,
                &wallet,
                &self.db,
                &entry.encrypted_key,
                &self.trade,
            );

            let outcome = trader.run(mode).await;
            exchange.close().await;
            outcome
        }
    }
}

/// Truncate to `dp` decimal places (no rounding up)
fn round_cut(value: Decimal, dp: u32) -> Decimal {
    value.trunc_with_scale(dp).normalize()
}

/// Limit price drifted off the top of the book: buys undercut the best bid,
/// sells sit above the best ask.
fn limit_price(settings: &LimitSettings, side: OrderSide, book: &crate::exchange::OrderBook) -> Result<Decimal> {
    let diff_percent = match side {
        OrderSide::Buy => settings.diff_price_buy,
        OrderSide::Sell => settings.diff_price_sell,
    };
    let mut diff = round_cut(diff_percent / Decimal::ONE_HUNDRED, 3);
    if side == OrderSide::Sell {
        diff = -diff;
    }

    let top = match side {
        OrderSide::Buy => book.bids.first(),
        OrderSide::Sell => book.asks.first(),
    };
    let top = top.ok_or_else(|| anyhow!("Empty order book"))?;
    Ok(round_cut(top - diff, 3))
}

/// 1e18-scale a decimal amount for the order message
fn to_wei(amount: Decimal) -> Result<U256> {
    let scaled = (amount * Decimal::from(1_000_000_000_000_000_000u64))
        .trunc()
        .normalize();
    U256::from_str(&scaled.to_string()).map_err(|e| anyhow!("Amount out of range: {e}"))
}

/// Event link re-finding the market a position belongs to
fn position_link(position: &Position) -> String {
    match position.multi_topic_id {
        Some(parent) => format!("?topicId={parent}&type=multi"),
        None => format!("?topicId={}", position.topic_id),
    }
}

fn pick_type(pool: &[OrderType]) -> OrderType {
    pool.choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(OrderType::Market)
}

fn uniform_decimal(lo: Decimal, hi: Decimal) -> Decimal {
    let lo_cents = (lo * Decimal::ONE_HUNDRED).trunc().to_i64().unwrap_or(0);
    let hi_cents = (hi * Decimal::ONE_HUNDRED).trunc().to_i64().unwrap_or(0);
    let cents = rand::thread_rng().gen_range(lo_cents.min(hi_cents)..=hi_cents.max(lo_cents));
    Decimal::new(cents, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradeSettings;
    use crate::db::Database;
    use crate::exchange::{OpenOrder, OrderBook};
    use crate::retry::RetryPolicy;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_round_cut_truncates() {
        assert_eq!(round_cut(dec!(12.3456), 2), dec!(12.34));
        assert_eq!(round_cut(dec!(0.9999), 3), dec!(0.999));
        assert_eq!(round_cut(dec!(5), 2), dec!(5));
    }

    #[test]
    fn test_limit_price_drift() {
        let settings = LimitSettings {
            diff_price_buy: dec!(1),
            diff_price_sell: dec!(2),
            wait_buy_mins: 5,
            wait_sell_mins: 5,
            max_reprices: 3,
        };
        let book = OrderBook {
            asks: vec![dec!(0.55), dec!(0.56)],
            bids: vec![dec!(0.52), dec!(0.51)],
        };

        // Buy undercuts best bid by 1%, sell sits 2% above best ask
        assert_eq!(
            limit_price(&settings, OrderSide::Buy, &book).unwrap(),
            dec!(0.51)
        );
        assert_eq!(
            limit_price(&settings, OrderSide::Sell, &book).unwrap(),
            dec!(0.57)
        );

        let empty = OrderBook {
            asks: vec![],
            bids: vec![],
        };
        assert!(limit_price(&settings, OrderSide::Buy, &empty).is_err());
    }

    #[test]
    fn test_to_wei() {
        assert_eq!(to_wei(dec!(1)).unwrap(), U256::from(10u128.pow(18)));
        assert_eq!(
            to_wei(dec!(12.34)).unwrap(),
            U256::from(12_340_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_position_link() {
        let mut position = Position {
            topic_id: 42,
            multi_topic_id: None,
            topic_title: "t".into(),
            outcome: "Yes".into(),
            outcome_side: 1,
            token_id: "1".into(),
            token_amount: dec!(1),
            value: dec!(1),
        };
        assert_eq!(position_link(&position), "?topicId=42");
        position.multi_topic_id = Some(7);
        assert_eq!(position_link(&position), "?topicId=7&type=multi");
    }

    // --- reprice-cap property against a scripted exchange -----------------

    /// Exchange double: never fills, moves the book every fetch, counts
    /// submissions and cancels.
    struct StallingExchange {
        books_served: AtomicU32,
        orders_placed: AtomicU32,
        orders_cancelled: AtomicU32,
    }

    impl StallingExchange {
        fn new() -> Self {
            Self {
                books_served: AtomicU32::new(0),
                orders_placed: AtomicU32::new(0),
                orders_cancelled: AtomicU32::new(0),
            }
        }

        fn test_event() -> EventInfo {
            EventInfo {
                name: "Test event".into(),
                topic_id: 1,
                question_id: "q-1".into(),
                prices: [dec!(0.5), dec!(0.5)],
                tokens: ["1001".into(), "1002".into()],
                labels: ["Yes".into(), "No".into()],
                is_child: false,
                force_vote: Some(1),
            }
        }
    }

    impl ExchangeApi for StallingExchange {
        async fn is_registered(&self) -> Result<bool> {
            Ok(true)
        }

        async fn login(&self, _m: &str, _s: &str, _t: i64, _n: u64) -> Result<()> {
            Ok(())
        }

        async fn profile(&self) -> Result<Profile> {
            Ok(Profile {
                balance: dec!(100),
                total_profit: dec!(0),
                volume: dec!(0),
                proxy_wallet: Some("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".into()),
            })
        }

        async fn is_approved(&self, _w: &str) -> Result<bool> {
            Ok(true)
        }

        async fn pick_event(&self, _q: Option<&EventQuery>) -> Result<Option<EventInfo>> {
            Ok(Some(Self::test_event()))
        }

        async fn order_book(&self, _e: &EventInfo, _c: usize) -> Result<OrderBook> {
            // Shift the bid every fetch so each deadline check sees a moved
            // price and forces a reprice
            let n = self.books_served.fetch_add(1, Ordering::SeqCst);
            let bid = dec!(0.40) + Decimal::new(n as i64, 2);
            Ok(OrderBook {
                asks: vec![dec!(0.99)],
                bids: vec![bid],
            })
        }

        async fn place_order(&self, _o: &OrderRequest) -> Result<String> {
            let n = self.orders_placed.fetch_add(1, Ordering::SeqCst);
            Ok(format!("order-{n}"))
        }

        async fn find_order(
            &self,
            _kind: OrderQueryKind,
            _topic_id: i64,
            _is_parent: bool,
            trans_no: &str,
        ) -> Result<Option<OrderStatus>> {
            Ok(Some(OrderStatus {
                trans_no: trans_no.to_string(),
                filled: dec!(0),
                total: dec!(10),
                price: dec!(0.5),
                total_price: dec!(5),
            }))
        }

        async fn open_orders(&self, _k: OrderQueryKind) -> Result<Vec<OpenOrder>> {
            Ok(vec![])
        }

        async fn positions(&self) -> Result<Vec<Position>> {
            Ok(vec![])
        }

        async fn position(&self, _t: i64, _s: u8) -> Result<Option<Position>> {
            Ok(None)
        }

        async fn rank(&self) -> Result<i64> {
            Ok(1)
        }

        async fn cancel_order(&self, _trans_no: &str) -> Result<()> {
            self.orders_cancelled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {}
    }

    static TEST_DIR: AtomicU32 = AtomicU32::new(0);

    fn test_db() -> Database {
        let dir: PathBuf = std::env::temp_dir().join(format!(
            "opinion-bot-trader-test-{}-{}",
            std::process::id(),
            TEST_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        let db = Database::new(dir.join("modules.json"), dir.join("report.json"), false).unwrap();
        db.set_master_key("test").unwrap();
        db
    }

    fn test_settings() -> TradeSettings {
        TradeSettings {
            open_order_types: vec![OrderType::Limit],
            close_order_types: vec![OrderType::Market],
            sleep_between_orders_secs: (0, 0),
            amount_usd_range: (dec!(5), dec!(10)),
            amount_percent_range: (dec!(5), dec!(10)),
            limit: LimitSettings {
                diff_price_buy: dec!(1),
                diff_price_sell: dec!(1),
                wait_buy_mins: 1,
                wait_sell_mins: 1,
                max_reprices: 3,
            },
            retry: RetryPolicy {
                max_attempts: 1,
                delay_range_secs: (0, 0),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprice_loop_respects_cap() {
        let exchange = StallingExchange::new();
        let wallet = Wallet::new(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let db = test_db();
        let settings = test_settings();
        let trader = Trader::new(&exchange, &wallet, &db, "test-key", &settings);

        let session = Session {
            profile: Profile {
                balance: dec!(100),
                total_profit: dec!(0),
                volume: dec!(0),
                proxy_wallet: Some(wallet.address.clone()),
            },
            proxy_wallet: wallet.address.clone(),
        };

        let result = trader
            .place_position_order(
                &session,
                OrderSide::Buy,
                OrderType::Limit,
                None,
                None,
                None,
            )
            .await;

        assert!(result.is_err());
        // Initial submission plus max_reprices resubmits, every one cancelled
        let placed = exchange.orders_placed.load(Ordering::SeqCst);
        assert_eq!(placed, settings.limit.max_reprices + 1);
        assert_eq!(
            exchange.orders_cancelled.load(Ordering::SeqCst),
            settings.limit.max_reprices + 1
        );
    }

    #[tokio::test]
    async fn test_order_amount_respects_balance() {
        let exchange = StallingExchange::new();
        let wallet = Wallet::new(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let db = test_db();
        let mut settings = test_settings();
        settings.amount_usd_range = (dec!(500), dec!(600));
        let trader = Trader::new(&exchange, &wallet, &db, "test-key", &settings);

        // Balance is 100, fixed range starts at 500
        assert!(trader.order_amount().await.is_err());

        settings.amount_usd_range = (dec!(0), dec!(0));
        settings.amount_percent_range = (dec!(10), dec!(10));
        let trader = Trader::new(&exchange, &wallet, &db, "test-key", &settings);
        assert_eq!(trader.order_amount().await.unwrap(), dec!(10));
    }
}
