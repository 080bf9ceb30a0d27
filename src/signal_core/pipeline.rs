//! Per-symbol analysis pipeline.
//!
//! One pipeline owns all mutable state for a symbol: both candle series,
//! both indicator engines, the trend classifier, the divergence detector and
//! the signal fuser. Pipelines never share state, so symbols can be driven
//! in parallel without coordination.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::EngineError;

use super::candles::{Candle, CandleSeries, Timeframe};
use super::divergence::DivergenceDetector;
use super::fusion::{FuserConfig, FuserState, Signal, SignalFuser};
use super::indicators::{IndicatorEngine, IndicatorSnapshot};
use super::trend::{TrendClassifier, TrendState};

/// A feed is stale once the newest candle is older than this many intervals.
const STALE_INTERVALS: i64 = 3;

/// Immutable view of pipeline state for concurrent readers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub symbol: String,
    pub trend: Option<TrendState>,
    pub macro_indicators: Option<IndicatorSnapshot>,
    pub micro_indicators: Option<IndicatorSnapshot>,
    pub fuser_state: FuserState,
}

pub struct SymbolPipeline {
    symbol: String,
    macro_series: CandleSeries,
    micro_series: CandleSeries,
    macro_indicators: IndicatorEngine,
    micro_indicators: IndicatorEngine,
    trend: TrendClassifier,
    detector: DivergenceDetector,
    fuser: SignalFuser,
    divergence_lookback: usize,
    stale_after: Duration,
}

impl SymbolPipeline {
    /// Build a pipeline for one symbol. Fails fast on invalid configuration;
    /// a rejected pipeline is never partially initialized.
    pub fn new(symbol: impl Into<String>, config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        let symbol = symbol.into();
        let capacity = config.series_capacity();

        Ok(Self {
            macro_series: CandleSeries::new(&symbol, config.macro_timeframe, capacity),
            micro_series: CandleSeries::new(&symbol, config.micro_timeframe, capacity),
            macro_indicators: IndicatorEngine::new(
                config.ema_fast_period,
                config.ema_slow_period,
                config.oscillator_period,
                capacity,
            ),
            micro_indicators: IndicatorEngine::new(
                config.ema_fast_period,
                config.ema_slow_period,
                config.oscillator_period,
                capacity,
            ),
            trend: TrendClassifier::new(config.trend_confirm_bars),
            detector: DivergenceDetector::new(
                config.divergence_lookback,
                config.pivot_radius,
                config.min_divergence_strength,
            ),
            fuser: SignalFuser::new(FuserConfig {
                trend_confirm_bars: config.trend_confirm_bars,
                cooldown_bars: config.signal_cooldown_bars,
                policy: config.fusion_policy,
            }),
            divergence_lookback: config.divergence_lookback,
            stale_after: Duration::seconds(config.micro_timeframe.secs() * STALE_INTERVALS),
            symbol,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn macro_timeframe(&self) -> Timeframe {
        self.macro_series.timeframe()
    }

    pub fn micro_timeframe(&self) -> Timeframe {
        self.micro_series.timeframe()
    }

    pub fn last_macro_open_time(&self) -> Option<DateTime<Utc>> {
        self.macro_series.last_open_time()
    }

    pub fn last_micro_open_time(&self) -> Option<DateTime<Utc>> {
        self.micro_series.last_open_time()
    }

    /// Apply one finalized macro candle as a single atomic step: the series
    /// append happens first, so a rejected candle leaves every component
    /// untouched.
    pub fn apply_macro(&mut self, candle: Candle) -> Result<(), EngineError> {
        self.macro_series.append(candle)?;
        self.macro_indicators.on_close(candle.close);
        if let Some(snapshot) = self.macro_indicators.snapshot() {
            self.trend.on_macro_close(&self.symbol, &snapshot);
        }
        Ok(())
    }

    /// Apply one finalized micro candle, same atomicity rule as macro.
    pub fn apply_micro(&mut self, candle: Candle) -> Result<(), EngineError> {
        self.micro_series.append(candle)?;
        self.micro_indicators.on_close(candle.close);
        Ok(())
    }

    /// Staleness check against the micro feed. `Some` carries the error for
    /// logging; the pipeline itself keeps computing while stale.
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<EngineError> {
        let last = self.micro_series.last()?;
        let age = now - last.close_time;
        if age > self.stale_after {
            return Some(EngineError::StaleData {
                symbol: self.symbol.clone(),
                timeframe: self.micro_series.timeframe(),
                last_close: last.close_time,
                age_secs: age.num_seconds(),
                limit_secs: self.stale_after.num_seconds(),
            });
        }
        None
    }

    /// Run one full analysis cycle: divergence scan over the micro window,
    /// then fusion against the confirmed macro trend.
    pub fn analyze(&mut self, now: DateTime<Utc>) -> Signal {
        let stale = match self.staleness(now) {
            Some(err) => {
                warn!(symbol = %self.symbol, "{err}");
                true
            }
            None => false,
        };

        let events = match self.micro_series.require(self.detector.min_candles()) {
            Ok(_) => {
                let window = self.micro_series.latest(self.divergence_lookback);
                let oscillator = self.micro_indicators.oscillator_tail(self.divergence_lookback);
                self.detector.detect(window, oscillator)
            }
            Err(err) => {
                debug!(symbol = %self.symbol, "divergence scan skipped: {err}");
                Vec::new()
            }
        };

        self.fuser
            .evaluate(&self.symbol, now, self.trend.state(), &events, stale)
    }

    /// Owned, immutable snapshot for any concurrent reader.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            symbol: self.symbol.clone(),
            trend: self.trend.state().copied(),
            macro_indicators: self.macro_indicators.snapshot(),
            micro_indicators: self.micro_indicators.snapshot(),
            fuser_state: self.fuser.state(),
        }
    }
}
