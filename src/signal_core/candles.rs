//! Candle data model and the per-(symbol, timeframe) series buffer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Fixed candle interval, parsed from Binance-style strings ("5m", "2h").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    count: u32,
    unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimeUnit {
    Minute,
    Hour,
    Day,
}

impl Timeframe {
    pub fn minutes(count: u32) -> Self {
        Self { count, unit: TimeUnit::Minute }
    }

    pub fn hours(count: u32) -> Self {
        Self { count, unit: TimeUnit::Hour }
    }

    /// Interval length in seconds.
    pub fn secs(&self) -> i64 {
        let per_unit = match self.unit {
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86_400,
        };
        self.count as i64 * per_unit
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.secs())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.unit {
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
        };
        write!(f, "{}{}", self.count, suffix)
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || EngineError::InvalidConfiguration(format!("unrecognized timeframe '{s}'"));
        let (digits, suffix) = s.split_at(s.len().saturating_sub(1));
        let count: u32 = digits.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        let unit = match suffix {
            "m" => TimeUnit::Minute,
            "h" => TimeUnit::Hour,
            "d" => TimeUnit::Day,
            _ => return Err(invalid()),
        };
        Ok(Self { count, unit })
    }
}

impl TryFrom<String> for Timeframe {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.to_string()
    }
}

/// One finalized OHLCV candle. Immutable once stored in a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bounded, time-ordered buffer of finalized candles for one
/// (symbol, timeframe) pair. Oldest candles roll off once capacity is hit.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
    capacity: usize,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            candles: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_open_time(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.open_time)
    }

    /// Append a finalized candle. Open time must be strictly after the
    /// current tail; anything else is rejected without touching the buffer.
    pub fn append(&mut self, candle: Candle) -> Result<(), EngineError> {
        if let Some(last) = self.candles.last() {
            if candle.open_time <= last.open_time {
                return Err(EngineError::OutOfOrderCandle {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                    last: last.open_time,
                    candidate: candle.open_time,
                });
            }
        }
        self.candles.push(candle);
        if self.candles.len() > self.capacity {
            self.candles.remove(0);
        }
        Ok(())
    }

    /// Last `k` candles, oldest first. Returns fewer if the series is short;
    /// callers check the length against their required lookback.
    pub fn latest(&self, k: usize) -> &[Candle] {
        let start = self.candles.len().saturating_sub(k);
        &self.candles[start..]
    }

    /// Like `latest`, but demands at least `k` candles so callers can
    /// surface an explicit not-ready status instead of a silent short slice.
    pub fn require(&self, k: usize) -> Result<&[Candle], EngineError> {
        if self.candles.len() < k {
            return Err(EngineError::InsufficientHistory {
                required: k,
                available: self.candles.len(),
            });
        }
        Ok(self.latest(k))
    }
}
