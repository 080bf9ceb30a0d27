//! Engine configuration.
//!
//! Defaults mirror the classic parameter set (10/20 EMA pair, 14-period
//! oscillator, 2h/5m timeframes). Validation runs once at startup; any
//! violation is an `InvalidConfiguration` and the engine refuses to start.

use serde::Deserialize;
use std::path::Path;

use crate::error::EngineError;
use crate::signal_core::candles::Timeframe;
use crate::signal_core::fusion::FusionPolicy;

/// Headroom added on top of the largest lookback when sizing series buffers.
const CAPACITY_MARGIN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Trading pairs to run independent pipelines for
    pub symbols: Vec<String>,
    /// Candle interval driving the trend classifier
    pub macro_timeframe: Timeframe,
    /// Candle interval driving the divergence detector
    pub micro_timeframe: Timeframe,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    /// Warm-up length for the momentum oscillator
    pub oscillator_period: usize,
    /// Window (candles) scanned for divergence each cycle
    pub divergence_lookback: usize,
    /// Neighbor radius for pivot confirmation
    pub pivot_radius: usize,
    /// Consecutive macro candles before a trend direction is trusted
    pub trend_confirm_bars: u32,
    /// Divergence events weaker than this are discarded
    pub min_divergence_strength: f64,
    /// Analysis cycles without a fresh entry after a signal
    pub signal_cooldown_bars: u32,
    /// Scheduling tick cadence for the poll loop
    pub poll_interval_seconds: u64,
    /// Candles requested from the market data source per fetch
    pub klines_limit: usize,
    pub fusion_policy: FusionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()],
            macro_timeframe: Timeframe::hours(2),
            micro_timeframe: Timeframe::minutes(5),
            ema_fast_period: 10,
            ema_slow_period: 20,
            oscillator_period: 14,
            divergence_lookback: 20,
            pivot_radius: 3,
            trend_confirm_bars: 3,
            min_divergence_strength: 0.1,
            signal_cooldown_bars: 3,
            poll_interval_seconds: 60,
            klines_limit: 200,
            fusion_policy: FusionPolicy::TrendPullback,
        }
    }
}

impl Config {
    /// Load from a JSON file; missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));

        if self.symbols.is_empty() {
            return invalid("at least one symbol is required".into());
        }
        for (name, value) in [
            ("ema_fast_period", self.ema_fast_period),
            ("ema_slow_period", self.ema_slow_period),
            ("oscillator_period", self.oscillator_period),
            ("divergence_lookback", self.divergence_lookback),
            ("pivot_radius", self.pivot_radius),
            ("klines_limit", self.klines_limit),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be a positive integer"));
            }
        }
        if self.trend_confirm_bars == 0 {
            return invalid("trend_confirm_bars must be a positive integer".into());
        }
        if self.poll_interval_seconds == 0 {
            return invalid("poll_interval_seconds must be a positive integer".into());
        }
        if self.ema_fast_period >= self.ema_slow_period {
            return invalid(format!(
                "ema_fast_period ({}) must be smaller than ema_slow_period ({})",
                self.ema_fast_period, self.ema_slow_period
            ));
        }
        if self.macro_timeframe.secs() <= self.micro_timeframe.secs() {
            return invalid(format!(
                "macro_timeframe ({}) must be strictly larger than micro_timeframe ({})",
                self.macro_timeframe, self.micro_timeframe
            ));
        }
        if 2 * self.pivot_radius + 2 > self.divergence_lookback {
            return invalid(format!(
                "pivot_radius ({}) is too large for divergence_lookback ({})",
                self.pivot_radius, self.divergence_lookback
            ));
        }
        if !(0.0..=1.0).contains(&self.min_divergence_strength) {
            return invalid(format!(
                "min_divergence_strength ({}) must be within [0, 1]",
                self.min_divergence_strength
            ));
        }
        Ok(())
    }

    /// Series capacity: the largest lookback any consumer needs plus margin.
    pub fn series_capacity(&self) -> usize {
        let lookbacks = [
            self.ema_slow_period,
            self.oscillator_period + 1,
            self.divergence_lookback,
            self.trend_confirm_bars as usize,
        ];
        lookbacks.into_iter().max().unwrap_or(0) + CAPACITY_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut config = Config::default();
        config.oscillator_period = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_macro_must_exceed_micro() {
        let mut config = Config::default();
        config.macro_timeframe = Timeframe::minutes(5);
        config.micro_timeframe = Timeframe::minutes(5);
        assert!(config.validate().is_err());

        config.macro_timeframe = Timeframe::minutes(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pivot_radius_bounded_by_lookback() {
        let mut config = Config::default();
        config.pivot_radius = 10;
        config.divergence_lookback = 20;
        assert!(config.validate().is_err());

        config.pivot_radius = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fast_ema_must_be_faster() {
        let mut config = Config::default();
        config.ema_fast_period = 20;
        config.ema_slow_period = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_series_capacity_covers_largest_lookback() {
        let config = Config::default();
        assert!(config.series_capacity() > config.divergence_lookback);
        assert!(config.series_capacity() > config.ema_slow_period);
    }

    #[test]
    fn test_config_parses_from_json() {
        let json = r#"{
            "symbols": ["SOLUSDT"],
            "macro_timeframe": "4h",
            "micro_timeframe": "15m",
            "fusion_policy": "strict_alignment"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.symbols, vec!["SOLUSDT"]);
        assert_eq!(config.macro_timeframe, Timeframe::hours(4));
        assert_eq!(config.micro_timeframe, Timeframe::minutes(15));
        assert_eq!(config.fusion_policy, FusionPolicy::StrictAlignment);
        // Unspecified fields keep defaults
        assert_eq!(config.ema_fast_period, 10);
        assert!(config.validate().is_ok());
    }
}
