//! Error taxonomy for the signal engine.
//!
//! Data-level errors (`OutOfOrderCandle`, `InsufficientHistory`, `StaleData`)
//! are handled locally per symbol and never abort the process. Configuration
//! errors are fatal at startup.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::signal_core::candles::Timeframe;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A candle arrived whose open time is not strictly after the series
    /// tail. The candle is dropped; the series is untouched.
    #[error(
        "out-of-order candle on {symbol} {timeframe}: open time {candidate} is not after {last}"
    )]
    OutOfOrderCandle {
        symbol: String,
        timeframe: Timeframe,
        last: DateTime<Utc>,
        candidate: DateTime<Utc>,
    },

    /// Not enough warm-up candles to produce a value. Callers must treat
    /// this as "not ready", never as zero.
    #[error("insufficient history: {required} candles required, {available} available")]
    InsufficientHistory { required: usize, available: usize },

    /// The feed has gone quiet: the newest candle is too old relative to the
    /// current cycle time. Analysis continues but no signal may be emitted.
    #[error(
        "stale data on {symbol} {timeframe}: last close {last_close} is {age_secs}s old (limit {limit_secs}s)"
    )]
    StaleData {
        symbol: String,
        timeframe: Timeframe,
        last_close: DateTime<Utc>,
        age_secs: i64,
        limit_secs: i64,
    },

    /// Bad periods/windows/timeframes. Not recoverable at runtime; the
    /// affected pipeline refuses to initialize.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
