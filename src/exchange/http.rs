//! Opinion REST API client
//!
//! One client per account-task, bound to the account's proxy and carrying a
//! browser-shaped session: Chrome user agent, app origin headers, a random
//! device fingerprint, and the bearer token captured at login.

use super::{
    CloudflareBlock, EventInfo, EventQuery, ExchangeApi, OpenOrder, OrderBook, OrderQueryKind,
    OrderRequest, OrderStatus, Position, Profile,
};
use anyhow::{anyhow, bail, Context, Result};
use rand::seq::SliceRandom;
use rand::RngCore;
use reqwest::{Client, Proxy};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

const API_BASE: &str = "https://proxy.opinion.trade:8443/api/bsc";
const APP_ORIGIN: &str = "https://app.opinion.trade";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// BSC USDT, the quote currency for every order
const CURRENCY_ADDRESS: &str = "0x55d398326f99059fF775485246999027B3197955";

/// Event picked from the configured pin list, optionally forcing a side
#[derive(Debug, Clone)]
pub struct PinnedEvent {
    pub link: String,
    /// 1-based outcome side to force
    pub vote: Option<u8>,
}

/// Event-browsing filters from config
#[derive(Debug, Clone)]
pub struct BrowseSettings {
    pub pinned: Vec<PinnedEvent>,
    /// Skip events whose cheaper side is below this many cents
    pub min_event_percent: Decimal,
    /// Skip events whose book spread exceeds this many cents
    pub max_spread_percent: Decimal,
}

/// Reqwest-backed `ExchangeApi` implementation
pub struct HttpExchange {
    client: Client,
    address: String,
    settings: BrowseSettings,
    bearer: Mutex<Option<String>>,
}

impl HttpExchange {
    pub fn new(
        proxy: Option<&str>,
        address: &str,
        settings: BrowseSettings,
    ) -> Result<Self> {
        let mut fingerprint = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut fingerprint);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, USER_AGENT.parse()?);
        headers.insert(reqwest::header::ORIGIN, APP_ORIGIN.parse()?);
        headers.insert(reqwest::header::REFERER, format!("{APP_ORIGIN}/").parse()?);
        headers.insert("x-device-kind", "web".parse()?);
        headers.insert("x-device-fingerprint", hex::encode(fingerprint).parse()?);

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30));

        match proxy {
            Some(url) => {
                builder = builder.proxy(Proxy::all(url).context("Invalid proxy url")?);
                debug!("{} | Using proxy {}", address, url);
            }
            None => warn!("{} | No proxy assigned", address),
        }

        Ok(Self {
            client: builder.build().context("Failed to create HTTP client")?,
            address: address.to_string(),
            settings,
            bearer: Mutex::new(None),
        })
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value> {
        let mut request = self.client.get(format!("{API_BASE}{path_and_query}"));
        if let Some(token) = self.bearer.lock().unwrap().clone() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("Request failed")?;
        parse_response(response).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let mut request = self.client.post(format!("{API_BASE}{path}")).json(&body);
        if let Some(token) = self.bearer.lock().unwrap().clone() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("Request failed")?;
        parse_response(response).await
    }

    /// Resolve one event from a link like `?topicId=123&type=multi`
    async fn fetch_linked_event(
        &self,
        link: &str,
        find_name: Option<&str>,
        force_vote: Option<u8>,
    ) -> Result<Option<EventInfo>> {
        let (topic_id, is_multi) = parse_event_link(link)
            .ok_or_else(|| anyhow!("Unparseable event link: {link}"))?;

        let path = if is_multi {
            format!("/api/v2/topic/mutil/{topic_id}")
        } else {
            format!("/api/v2/topic/{topic_id}")
        };
        let result = self.get_json(&path).await?;
        let topic = &result["data"];

        let children = topic["childList"].as_array();
        let mut candidates = Vec::new();
        match children {
            Some(children) if !children.is_empty() => {
                let parent_title = val_str(topic, "title");
                for child in children {
                    if let Some(mut event) = parse_topic(child, Some(&parent_title)) {
                        if let Some(name) = find_name {
                            if val_str(child, "title") != name {
                                continue;
                            }
                        }
                        event.force_vote = force_vote;
                        candidates.push(event);
                    }
                }
            }
            _ => {
                if let Some(mut event) = parse_topic(topic, None) {
                    event.force_vote = force_vote;
                    candidates.push(event);
                }
            }
        }

        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }

    /// Browse the public topic listing and keep events passing the price and
    /// spread filters. Stops after a few candidates to bound request count.
    async fn browse_events(&self) -> Result<Option<EventInfo>> {
        let result = self
            .get_json(
                "/api/v2/topic?labelId=&keywords=&sortBy=3&chainId=56&limit=30&status=2\
                 &isShow=1&topicType=2&page=1&indicatorType=2",
            )
            .await?;

        let mut raw_events = Vec::new();
        for topic in result["list"].as_array().into_iter().flatten() {
            match topic["childList"].as_array() {
                Some(children) if !children.is_empty() => {
                    let parent_title = val_str(topic, "title");
                    for child in children {
                        raw_events.extend(parse_topic(child, Some(&parent_title)));
                    }
                }
                _ => raw_events.extend(parse_topic(topic, None)),
            }
        }
        raw_events.shuffle(&mut rand::thread_rng());

        let hundred = Decimal::from(100);
        let mut candidates = Vec::new();
        for event in raw_events {
            let cheap_side = event.prices[0].min(event.prices[1]);
            if cheap_side * hundred < self.settings.min_event_percent {
                continue;
            }
            let book = self.order_book(&event, 0).await?;
            let (Some(ask), Some(bid)) = (book.asks.first(), book.bids.first()) else {
                continue;
            };
            let spread = (ask - bid) * hundred;
            if spread <= self.settings.max_spread_percent {
                candidates.push(event);
                // Bound the depth requests per browse
                if candidates.len() > 2 {
                    break;
                }
            }
        }

        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }
}

impl ExchangeApi for HttpExchange {
    async fn is_registered(&self) -> Result<bool> {
        let result = self
            .get_json(&format!(
                "/api/v1/user/is/new/user?wallet_address={}",
                self.address
            ))
            .await?;
        let is_new = result["result"]
            .as_bool()
            .ok_or_else(|| anyhow!("Malformed registration response"))?;
        Ok(!is_new)
    }

    async fn login(
        &self,
        message: &str,
        signature: &str,
        timestamp: i64,
        nonce: u64,
    ) -> Result<()> {
        let result = self
            .post_json(
                "/api/v1/user/token",
                json!({
                    "nonce": nonce.to_string(),
                    "timestamp": timestamp,
                    "siwe_message": message,
                    "sign": signature,
                    "invite_code": "",
                    "sources": "web",
                    "sign_in_wallet_plugin": null,
                }),
            )
            .await?;

        let token = result["token"]
            .as_str()
            .ok_or_else(|| anyhow!("Login response missing token"))?;
        *self.bearer.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    async fn profile(&self) -> Result<Profile> {
        let result = self
            .get_json(&format!("/api/v2/user/{}/profile?chainId=56", self.address))
            .await?;

        let balance = result["balance"]
            .as_array()
            .and_then(|b| b.first())
            .map(|entry| val_dec(entry, "balance"))
            .unwrap_or_default();

        Ok(Profile {
            balance,
            total_profit: val_dec(&result, "totalProfit"),
            volume: val_dec(&result, "Volume"),
            proxy_wallet: result["multiSignedWalletAddress"]["56"]
                .as_str()
                .map(str::to_string),
        })
    }

    async fn is_approved(&self, proxy_wallet: &str) -> Result<bool> {
        let result = self
            .get_json(&format!(
                "/api/v2/gnosis_safe/{proxy_wallet}/approved?chainId=56"
            ))
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn pick_event(&self, query: Option<&EventQuery>) -> Result<Option<EventInfo>> {
        if let Some(query) = query {
            return self
                .fetch_linked_event(&query.link, Some(&query.event_name), Some(query.vote))
                .await;
        }
        let pinned = self.settings.pinned.choose(&mut rand::thread_rng()).cloned();
        if let Some(pinned) = pinned {
            return self.fetch_linked_event(&pinned.link, None, pinned.vote).await;
        }
        self.browse_events().await
    }

    async fn order_book(&self, event: &EventInfo, choice: usize) -> Result<OrderBook> {
        let symbol = &event.tokens[choice.min(1)];
        let result = self
            .get_json(&format!(
                "/api/v2/order/market/depth?symbol_types={}&question_id={}&symbol={}&chainId=56",
                choice, event.question_id, symbol
            ))
            .await?;

        let mut asks = level_prices(&result["asks"]);
        let mut bids = level_prices(&result["bids"]);
        asks.sort();
        bids.sort_by(|a, b| b.cmp(a));

        Ok(OrderBook { asks, bids })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let trading_method = if order.price == "0" { 1 } else { 2 };
        let result = self
            .post_json(
                "/api/v2/order",
                json!({
                    "contractAddress": "",
                    "orderExpTime": "0",
                    "currencyAddress": CURRENCY_ADDRESS,
                    "chainId": 56,
                    "salt": order.salt,
                    "maker": order.maker,
                    "signer": order.signer,
                    "taker": "0x0000000000000000000000000000000000000000",
                    "tokenId": order.token_id,
                    "makerAmount": order.maker_amount,
                    "takerAmount": order.taker_amount,
                    "expiration": "0",
                    "nonce": "0",
                    "feeRateBps": "0",
                    "side": order.side.to_string(),
                    "signatureType": "2",
                    "topicId": order.topic_id,
                    "signature": order.signature,
                    "sign": order.signature,
                    "timestamp": chrono::Utc::now().timestamp(),
                    "safeRate": order.safe_rate,
                    "price": order.price,
                    "tradingMethod": trading_method,
                }),
            )
            .await?;

        result["orderData"]["transNo"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Order response missing transNo"))
    }

    async fn find_order(
        &self,
        kind: OrderQueryKind,
        topic_id: i64,
        is_parent: bool,
        trans_no: &str,
    ) -> Result<Option<OrderStatus>> {
        let topic_param = if is_parent { "parentTopicId" } else { "topicId" };
        let result = self
            .get_json(&format!(
                "/api/v2/order?page=1&limit=100&walletAddress={}&queryType={}&{}={}",
                self.address,
                query_type(kind),
                topic_param,
                topic_id
            ))
            .await?;

        let order = result["list"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|order| val_str(order, "transNo") == trans_no);

        Ok(order.map(|order| {
            let filled = val_str(order, "filled");
            let (filled, total) = match filled.split_once('/') {
                Some((have, want)) => (parse_dec(have), parse_dec(want)),
                None => (Decimal::ZERO, Decimal::ZERO),
            };
            OrderStatus {
                trans_no: trans_no.to_string(),
                filled,
                total,
                price: val_dec(order, "price"),
                total_price: val_dec(order, "totalPrice"),
            }
        }))
    }

    async fn open_orders(&self, kind: OrderQueryKind) -> Result<Vec<OpenOrder>> {
        let result = self
            .get_json(&format!(
                "/api/v2/order?page=1&limit=100&walletAddress={}&queryType={}",
                self.address,
                query_type(kind)
            ))
            .await?;

        Ok(result["list"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|order| {
                let topic_title = val_str(order, "topicTitle");
                let multi_title = val_str(order, "mutilTitle");
                OpenOrder {
                    trans_no: val_str(order, "transNo"),
                    title: if multi_title.is_empty() {
                        topic_title
                    } else {
                        format!("{multi_title} {topic_title}")
                    },
                }
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let result = self
            .get_json(&format!(
                "/api/v2/portfolio?page=1&limit=100&walletAddress={}&chainId=56",
                self.address
            ))
            .await?;

        Ok(result["list"]
            .as_array()
            .into_iter()
            .flatten()
            .map(parse_position)
            .collect())
    }

    async fn position(&self, topic_id: i64, outcome_side: u8) -> Result<Option<Position>> {
        let result = self
            .get_json(&format!(
                "/api/v2/portfolio?page=1&limit=100&walletAddress={}&topicId={}",
                self.address, topic_id
            ))
            .await?;

        Ok(result["list"]
            .as_array()
            .into_iter()
            .flatten()
            .map(parse_position)
            .find(|p| p.outcome_side == outcome_side))
    }

    async fn rank(&self) -> Result<i64> {
        let result = self
            .get_json(&format!(
                "/api/v2/leaderboard/{}?dataType=volume&chainId=56&period=0",
                self.address
            ))
            .await?;
        result["id"]
            .as_i64()
            .ok_or_else(|| anyhow!("Malformed leaderboard response"))
    }

    async fn cancel_order(&self, trans_no: &str) -> Result<()> {
        let result = self
            .post_json(
                "/api/v1/order/cancel/order",
                json!({ "trans_no": trans_no, "chainId": 56 }),
            )
            .await?;
        if !result["result"].as_bool().unwrap_or(false) {
            bail!("Cancel rejected for order {trans_no}");
        }
        Ok(())
    }

    async fn close(&self) {
        // Dropping the client tears the pooled connections down; the token
        // is cleared so a reused instance cannot act on a stale session.
        self.bearer.lock().unwrap().take();
        debug!("{} | Sessions closed", self.address);
    }
}

/// Check for WAF challenges, decode the response envelope, and unwrap the
/// `result` payload.
async fn parse_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.context("Failed to read response")?;

    if status.as_u16() == 403 || status.as_u16() == 503 {
        let lowered = body.to_lowercase();
        if lowered.contains("cloudflare") || lowered.contains("cf-chl") || lowered.contains("challenge") {
            return Err(CloudflareBlock.into());
        }
    }
    if !status.is_success() {
        bail!("API error {status}: {body}");
    }

    let parsed: Value = serde_json::from_str(&body).context("Response is not JSON")?;
    let errno = parsed["errno"].as_i64().unwrap_or(0);
    let errmsg = parsed["errmsg"].as_str().unwrap_or("");
    if errno != 0 || !errmsg.is_empty() {
        bail!("API rejected request (errno {errno}): {errmsg}");
    }

    Ok(parsed["result"].clone())
}

fn query_type(kind: OrderQueryKind) -> u8 {
    match kind {
        OrderQueryKind::Market => 2,
        OrderQueryKind::Limit => 1,
    }
}

/// Extract `topicId` and multi-ness from a `?topicId=..&type=multi` link
fn parse_event_link(link: &str) -> Option<(String, bool)> {
    let query = link.split_once('?').map(|(_, q)| q).unwrap_or(link);
    let mut topic_id = None;
    let mut is_multi = false;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("topicId", value)) if !value.is_empty() => topic_id = Some(value.to_string()),
            Some(("type", value)) => is_multi = value == "multi",
            _ => {}
        }
    }
    topic_id.map(|id| (id, is_multi))
}

/// Reduce a raw topic payload to an `EventInfo`
fn parse_topic(topic: &Value, parent_title: Option<&str>) -> Option<EventInfo> {
    let title = val_str(topic, "title");
    let topic_id = topic["topicId"].as_i64()?;

    let yes_price = opt_dec(topic, "yesBuyPrice").or_else(|| opt_dec(topic, "yesMarketPrice"))?;
    let no_price = opt_dec(topic, "noBuyPrice").or_else(|| opt_dec(topic, "noMarketPrice"))?;

    Some(EventInfo {
        name: match parent_title {
            Some(parent) => format!("{parent} {title}"),
            None => title,
        },
        topic_id,
        question_id: val_str(topic, "questionId"),
        prices: [yes_price, no_price],
        tokens: [val_str(topic, "yesPos"), val_str(topic, "noPos")],
        labels: [val_str(topic, "yesLabel"), val_str(topic, "noLabel")],
        is_child: parent_title.is_some(),
        force_vote: None,
    })
}

fn parse_position(position: &Value) -> Position {
    let multi_topic_id = position["mutilTopicId"].as_i64().filter(|id| *id != 0);
    Position {
        topic_id: position["topicId"].as_i64().unwrap_or_default(),
        multi_topic_id,
        topic_title: val_str(position, "topicTitle"),
        outcome: val_str(position, "outcome"),
        outcome_side: position["outcomeSide"].as_u64().unwrap_or_default() as u8,
        token_id: val_str(position, "tokenId"),
        token_amount: val_dec(position, "tokenAmount"),
        value: val_dec(position, "value"),
    }
}

/// Prices of `[price, size]` depth levels, tolerating string or number cells
fn level_prices(levels: &Value) -> Vec<Decimal> {
    levels
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|level| level.get(0))
        .map(json_dec)
        .collect()
}

fn val_str(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn val_dec(value: &Value, key: &str) -> Decimal {
    json_dec(&value[key])
}

fn opt_dec(value: &Value, key: &str) -> Option<Decimal> {
    match &value[key] {
        Value::Null => None,
        other => Some(json_dec(other)),
    }
}

/// Decimal from a JSON cell that may be a string or a number
fn json_dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => parse_dec(s),
        Value::Number(n) => parse_dec(&n.to_string()),
        _ => Decimal::ZERO,
    }
}

fn parse_dec(s: &str) -> Decimal {
    Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_event_link() {
        assert_eq!(
            parse_event_link("?topicId=123&type=multi"),
            Some(("123".to_string(), true))
        );
        assert_eq!(
            parse_event_link("https://app.opinion.trade/detail?topicId=77"),
            Some(("77".to_string(), false))
        );
        assert_eq!(parse_event_link("?type=multi"), None);
    }

    #[test]
    fn test_parse_topic_prefers_buy_price() {
        let raw = json!({
            "title": "Team A wins",
            "topicId": 5,
            "questionId": "q-5",
            "yesPos": "tok-yes",
            "noPos": "tok-no",
            "yesLabel": "Yes",
            "noLabel": "No",
            "yesBuyPrice": "0.62",
            "yesMarketPrice": "0.60",
            "noBuyPrice": null,
            "noMarketPrice": 0.40,
        });

        let event = parse_topic(&raw, Some("Finals")).unwrap();
        assert_eq!(event.name, "Finals Team A wins");
        assert_eq!(event.prices, [dec!(0.62), dec!(0.40)]);
        assert!(event.is_child);
    }

    #[test]
    fn test_level_prices_mixed_cells() {
        let levels = json!([["0.55", "100"], [0.54, 20]]);
        assert_eq!(level_prices(&levels), vec![dec!(0.55), dec!(0.54)]);
    }

    #[test]
    fn test_filled_fraction_parsing() {
        let status = OrderStatus {
            trans_no: "t".into(),
            filled: dec!(10.004),
            total: dec!(10.001),
            price: dec!(0.5),
            total_price: dec!(5),
        };
        // Agreement to the cent counts as filled
        assert!(status.is_filled());
    }
}
