use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::FETCH_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::types::{Candle, Pair};

/// Source of daily candles. Implementations translate the pair to whatever
/// symbol the upstream expects and must enforce a finite request timeout.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Daily candles covering `[from, to]`. Order is not guaranteed.
    async fn fetch(&self, pair: Pair, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>>;
}

/// Mercado Bitcoin public candles endpoint.
pub struct MercadoBitcoinClient {
    base_url: String,
    client: reqwest::Client,
}

impl MercadoBitcoinClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { base_url: base_url.into(), client })
    }
}

#[async_trait]
impl CandleSource for MercadoBitcoinClient {
    async fn fetch(&self, pair: Pair, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>> {
        let (from_ts, to_ts) = unix_span(from, to);
        let url = format!(
            "{}/candles?symbol={}&from={}&to={}&resolution=1d",
            self.base_url.trim_end_matches('/'),
            pair.upstream_symbol(),
            from_ts,
            to_ts,
        );
        debug!(pair = %pair, %url, "requesting candles");

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!(pair = %pair, %status, "candle provider returned an error status");
            return Err(AppError::Fetch(format!("{pair}: upstream status {status}")));
        }

        let body = resp.text().await?;
        let candles = parse_candles(pair, &body)?;
        info!(pair = %pair, count = candles.len(), %from, %to, "candles fetched");
        if let Some(c) = candles.last() {
            debug!(
                pair = %pair,
                day = %c.day,
                open = c.open,
                high = c.high,
                low = c.low,
                close = c.close,
                volume = c.volume,
                "newest candle"
            );
        }
        Ok(candles)
    }
}

/// Unix seconds from UTC midnight of `from` to the last second of `to`.
pub fn unix_span(from: NaiveDate, to: NaiveDate) -> (i64, i64) {
    let start = from.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp();
    let end = to.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc().timestamp();
    (start, end)
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// The provider has answered in two shapes: parallel arrays keyed by field,
/// or a `candles` list of objects. Numbers arrive as strings in both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandleResponse {
    Columnar {
        t: Vec<i64>,
        o: Vec<String>,
        h: Vec<String>,
        l: Vec<String>,
        c: Vec<String>,
        v: Vec<String>,
    },
    Rows {
        candles: Vec<RawCandle>,
    },
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
}

pub fn parse_candles(pair: Pair, body: &str) -> Result<Vec<Candle>> {
    let response: CandleResponse = serde_json::from_str(body)?;

    let raw: Vec<RawCandle> = match response {
        CandleResponse::Rows { candles } => candles,
        CandleResponse::Columnar { t, o, h, l, c, v } => {
            let n = t.len();
            if [o.len(), h.len(), l.len(), c.len(), v.len()].iter().any(|&len| len != n) {
                return Err(AppError::Fetch(format!(
                    "{pair}: columnar candle arrays have mismatched lengths"
                )));
            }
            t.into_iter()
                .zip(o)
                .zip(h)
                .zip(l)
                .zip(c)
                .zip(v)
                .map(|(((((t, o), h), l), c), v)| RawCandle { t, o, h, l, c, v })
                .collect()
        }
    };

    raw.into_iter().map(|r| to_candle(pair, r)).collect()
}

fn to_candle(pair: Pair, r: RawCandle) -> Result<Candle> {
    let day = DateTime::from_timestamp(r.t, 0)
        .ok_or_else(|| AppError::Fetch(format!("{pair}: candle timestamp {} out of range", r.t)))?
        .date_naive();
    Ok(Candle {
        pair,
        day,
        open: parse_price(pair, "open", &r.o)?,
        high: parse_price(pair, "high", &r.h)?,
        low: parse_price(pair, "low", &r.l)?,
        close: parse_price(pair, "close", &r.c)?,
        volume: parse_price(pair, "volume", &r.v)?,
    })
}

fn parse_price(pair: Pair, field: &str, s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::Fetch(format!("{pair}: candle {field} '{s}' is not a number")))
}
