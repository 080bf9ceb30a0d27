//! Market data retrieval from the Binance public REST API.
//!
//! The engine consumes candle history through the narrow `CandleSource`
//! trait; this module provides the production implementation against
//! `GET /api/v3/klines`. The endpoint is public, so no credential handling
//! is involved. Fetched data is untrusted: the series ordering invariant is
//! enforced downstream at append time.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::signal_core::candles::{Candle, Timeframe};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Narrow interface to whatever supplies candle history. Returns candles
/// oldest first; the last row may still be in-flight and is filtered out by
/// the ingestion path.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: base_url.into() })
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let interval = timeframe.to_string();
        let limit_str = limit.to_string();

        let rows: Vec<Value> = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval.as_str()),
                ("limit", limit_str.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("kline request failed for {symbol} {interval}"))?
            .error_for_status()
            .with_context(|| format!("kline request rejected for {symbol} {interval}"))?
            .json()
            .await
            .with_context(|| format!("malformed kline payload for {symbol} {interval}"))?;

        let candles = rows
            .iter()
            .map(parse_kline)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("unparseable kline row for {symbol} {interval}"))?;

        debug!(symbol, %interval, count = candles.len(), "fetched klines");
        Ok(candles)
    }
}

/// A Binance kline row is a JSON array:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices/volume encoded as strings and times in epoch milliseconds.
fn parse_kline(row: &Value) -> Result<Candle> {
    let fields = row.as_array().ok_or_else(|| anyhow!("kline row is not an array"))?;
    if fields.len() < 7 {
        return Err(anyhow!("kline row has {} fields, expected at least 7", fields.len()));
    }

    Ok(Candle {
        open_time: millis_field(&fields[0], "open time")?,
        open: price_field(&fields[1], "open")?,
        high: price_field(&fields[2], "high")?,
        low: price_field(&fields[3], "low")?,
        close: price_field(&fields[4], "close")?,
        volume: price_field(&fields[5], "volume")?,
        close_time: millis_field(&fields[6], "close time")?,
    })
}

fn millis_field(value: &Value, name: &str) -> Result<DateTime<Utc>> {
    let millis = value
        .as_i64()
        .ok_or_else(|| anyhow!("{name} is not an integer"))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("{name} {millis} is out of range"))
}

fn price_field(value: &Value, name: &str) -> Result<f64> {
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow!("{name} is not a string"))?;
    raw.parse::<f64>()
        .map_err(|_| anyhow!("{name} '{raw}' is not a number"))
}
