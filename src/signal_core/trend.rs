//! Macro-timeframe trend classification with crossover hysteresis.
//!
//! A raw fast/slow EMA comparison flaps on noisy crossovers, so a candidate
//! direction must hold for `confirm_bars` consecutive macro closes before it
//! is adopted as the confirmed direction.

use serde::Serialize;
use std::fmt;
use tracing::info;

use super::indicators::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "UP"),
            TrendDirection::Down => write!(f, "DOWN"),
            TrendDirection::Flat => write!(f, "FLAT"),
        }
    }
}

/// Confirmed trend state for one symbol. The only state in the engine with
/// memory longer than a single analysis window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendState {
    /// Confirmed direction; `Flat` means unconfirmed (no macro filter).
    pub direction: TrendDirection,
    pub fast_ema: f64,
    pub slow_ema: f64,
    /// Consecutive macro closes the current candidate direction has held.
    pub consecutive_confirming_bars: u32,
}

impl TrendState {
    pub fn is_confirmed(&self) -> bool {
        self.direction != TrendDirection::Flat
    }
}

/// Consumes macro-timeframe indicator snapshots, one per finalized candle.
#[derive(Debug, Clone)]
pub struct TrendClassifier {
    confirm_bars: u32,
    candidate: TrendDirection,
    candidate_run: u32,
    state: Option<TrendState>,
}

impl TrendClassifier {
    pub fn new(confirm_bars: u32) -> Self {
        Self {
            confirm_bars,
            candidate: TrendDirection::Flat,
            candidate_run: 0,
            state: None,
        }
    }

    /// `None` until the first macro close with ready indicators.
    pub fn state(&self) -> Option<&TrendState> {
        self.state.as_ref()
    }

    /// Advance by one finalized macro candle.
    pub fn on_macro_close(&mut self, symbol: &str, snapshot: &IndicatorSnapshot) -> &TrendState {
        let candidate = if snapshot.fast_ema > snapshot.slow_ema {
            TrendDirection::Up
        } else if snapshot.fast_ema < snapshot.slow_ema {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        };

        if candidate == self.candidate {
            self.candidate_run += 1;
        } else {
            self.candidate = candidate;
            self.candidate_run = 1;
        }

        let previous = self.state.map(|s| s.direction).unwrap_or(TrendDirection::Flat);
        let confirmed = if self.candidate_run >= self.confirm_bars {
            self.candidate
        } else {
            previous
        };

        if confirmed != previous {
            info!(
                symbol,
                from = %previous,
                to = %confirmed,
                held_bars = self.candidate_run,
                "trend direction confirmed"
            );
        }

        self.state.insert(TrendState {
            direction: confirmed,
            fast_ema: snapshot.fast_ema,
            slow_ema: snapshot.slow_ema,
            consecutive_confirming_bars: self.candidate_run,
        })
    }
}
