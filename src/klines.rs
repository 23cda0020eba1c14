//! Binance USDⓈ-M futures REST client.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::candles::{Candle, CandleSeries, MarketInfo};
use crate::error::FetchError;
use crate::market_data::MarketData;

pub const EXCHANGE_ID: &str = "binance";

const BASE_URL: &str = "https://fapi.binance.com";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Slack added on top of an IP ban window before retrying.
const BAN_SLACK: Duration = Duration::from_secs(5);

const INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

static BAN_UNTIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"until\s+(\d+)").expect("ban pattern is valid"));

/// `BTC/USDT` -> `BTCUSDT`.
pub fn exchange_symbol(pair: &str) -> String {
    pair.replace('/', "").to_uppercase()
}

/// Millisecond timestamp a `-1003` ban lifts at, if the body carries one.
fn ban_until(body: &str) -> Option<i64> {
    if !body.contains("-1003") {
        return None;
    }
    BAN_UNTIL.captures(body)?.get(1)?.as_str().parse().ok()
}

/// Numbers arrive either as JSON numbers or as decimal strings.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn parse_klines(raw: Vec<Vec<Value>>) -> Result<CandleSeries, FetchError> {
    let candles = raw
        .iter()
        .map(|kline| {
            let field = |i: usize| {
                kline
                    .get(i)
                    .and_then(lenient_f64)
                    .ok_or_else(|| FetchError::ExchangeData(format!("bad kline field {i}: {kline:?}")))
            };
            Ok(Candle {
                timestamp: field(0)? as i64,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;
    Ok(CandleSeries::new(candles))
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    contract_type: String,
    price_precision: u32,
}

/// Tradable perpetuals quoted in `quote`, keyed `BASE/QUOTE`. A non-empty
/// `pairs` list restricts the result to those pairs.
fn markets_from_info(info: ExchangeInfo, quote: &str, pairs: &[String]) -> BTreeMap<String, MarketInfo> {
    info.symbols
        .into_iter()
        .filter(|symbol| {
            symbol.quote_asset.eq_ignore_ascii_case(quote)
                && symbol.status == "TRADING"
                && symbol.contract_type == "PERPETUAL"
        })
        .map(|symbol| {
            (
                format!("{}/{}", symbol.base_asset, symbol.quote_asset).to_uppercase(),
                MarketInfo {
                    base: symbol.base_asset,
                    quote: symbol.quote_asset,
                    price_precision: symbol.price_precision,
                },
            )
        })
        .filter(|(pair, _)| pairs.is_empty() || pairs.iter().any(|wanted| wanted.eq_ignore_ascii_case(pair)))
        .collect()
}

enum Attempt {
    Done(CandleSeries),
    Retry { wait: Duration, reason: String },
}

pub struct BinanceFutures {
    client: Client,
    base_url: String,
    candle_limit: u32,
}

impl BinanceFutures {
    pub fn new(candle_limit: u32) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(50)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(BinanceFutures {
            client,
            base_url: BASE_URL.to_owned(),
            candle_limit,
        })
    }

    pub async fn fetch_markets(&self, quote: &str, pairs: &[String]) -> anyhow::Result<BTreeMap<String, MarketInfo>> {
        let info: ExchangeInfo = self
            .client
            .get(format!("{}/fapi/v1/exchangeInfo", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(markets_from_info(info, quote, pairs))
    }

    async fn attempt(&self, symbol: &str, period: &str) -> Result<Attempt, FetchError> {
        let response = match self
            .client
            .get(format!("{}/fapi/v1/klines", self.base_url))
            .query(&[
                ("symbol", symbol.to_owned()),
                ("interval", period.to_owned()),
                ("limit", self.candle_limit.to_string()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return Ok(Attempt::Retry {
                    wait: RETRY_DELAY,
                    reason: err.to_string(),
                });
            }
        };

        let status = response.status();
        if status == StatusCode::IM_A_TEAPOT || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            let now = chrono::Utc::now().timestamp_millis();
            let wait = ban_until(&body)
                .filter(|until| *until > now)
                .map(|until| Duration::from_millis((until - now) as u64) + BAN_SLACK)
                .unwrap_or(RETRY_DELAY);
            return Ok(Attempt::Retry {
                wait,
                reason: format!("rate limited ({status})"),
            });
        }
        if status.is_server_error() {
            return Ok(Attempt::Retry {
                wait: RETRY_DELAY,
                reason: format!("server error ({status})"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::ExchangeData(format!("{status}: {body}")));
        }

        let raw: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|err| FetchError::ExchangeData(err.to_string()))?;
        Ok(Attempt::Done(parse_klines(raw)?))
    }
}

#[async_trait]
impl MarketData for BinanceFutures {
    async fn fetch_candles(&self, pair: &str, exchange: &str, period: &str) -> Result<CandleSeries, FetchError> {
        if exchange != EXCHANGE_ID {
            return Err(FetchError::ExchangeData(format!("{exchange} is not served by this client")));
        }
        if !INTERVALS.contains(&period) {
            debug!(pair, period, "interval not offered by the exchange");
            return Ok(CandleSeries::default());
        }

        let symbol = exchange_symbol(pair);
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&symbol, period).await? {
                Attempt::Done(series) => return Ok(series),
                Attempt::Retry { wait, reason } => {
                    warn!(pair, period, attempt, %reason, "kline request failed");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
        Err(FetchError::RetryExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }
}
