//! Price-vs-momentum divergence detection on the micro timeframe.
//!
//! Stateless per cycle: every pass re-derives pivots from the candle window
//! alone, so output is deterministic and reproducible from candle history.
//!
//! Detection recipe:
//! 1. Find confirmed price pivots (local extrema over a symmetric
//!    `pivot_radius` neighborhood; the newest `pivot_radius` candles cannot
//!    be confirmed yet and are skipped).
//! 2. Pair the two most recent pivots of the same kind.
//! 3. Bullish: lower price low with a higher oscillator low. Bearish: higher
//!    price high with a lower oscillator high.
//! 4. Score strength by normalizing both deltas against their window ranges;
//!    weak events below `min_strength` are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use super::candles::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed local price extremum inside the detection window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PivotPoint {
    /// Index within the detection window, oldest = 0.
    pub index: usize,
    /// Open time of the pivot candle; stable across window shifts.
    pub time: DateTime<Utc>,
    pub price: f64,
    pub kind: PivotKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DivergenceKind {
    Bullish,
    Bearish,
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceKind::Bullish => write!(f, "bullish"),
            DivergenceKind::Bearish => write!(f, "bearish"),
        }
    }
}

/// A qualifying price-vs-momentum disagreement between two pivots.
/// Transient: recomputed each cycle, never accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DivergenceEvent {
    pub kind: DivergenceKind,
    pub first_pivot: PivotPoint,
    pub second_pivot: PivotPoint,
    pub first_oscillator: f64,
    pub second_oscillator: f64,
    /// Second pivot price minus first pivot price.
    pub price_delta: f64,
    /// Oscillator at second pivot minus oscillator at first pivot.
    pub oscillator_delta: f64,
    /// Combined normalized magnitude in [0, 1].
    pub strength: f64,
}

/// Divergence detector over a bounded lookback of micro candles.
#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    lookback: usize,
    pivot_radius: usize,
    min_strength: f64,
}

impl DivergenceDetector {
    pub fn new(lookback: usize, pivot_radius: usize, min_strength: f64) -> Self {
        Self { lookback, pivot_radius, min_strength }
    }

    /// Fewest candles a scan can work with: two pivots, each with a full
    /// neighborhood.
    pub fn min_candles(&self) -> usize {
        2 * self.pivot_radius + 2
    }

    /// Scan the aligned candle/oscillator tails for divergence. Both slices
    /// end at the latest finalized candle; at most one event per kind is
    /// returned. Short history yields no events, never a default value.
    pub fn detect(&self, candles: &[Candle], oscillator: &[f64]) -> Vec<DivergenceEvent> {
        let n = self.lookback.min(candles.len()).min(oscillator.len());
        if n < self.min_candles() {
            return Vec::new();
        }
        let window = &candles[candles.len() - n..];
        let osc = &oscillator[oscillator.len() - n..];

        let mut events = Vec::new();
        if let Some(event) = self.pair_divergence(window, osc, PivotKind::Low) {
            events.push(event);
        }
        if let Some(event) = self.pair_divergence(window, osc, PivotKind::High) {
            events.push(event);
        }
        events
    }

    /// Pair the two most recent same-kind pivots and test the divergence
    /// condition for that side.
    fn pair_divergence(
        &self,
        window: &[Candle],
        osc: &[f64],
        kind: PivotKind,
    ) -> Option<DivergenceEvent> {
        let pivots = self.find_pivots(window, kind);
        if pivots.len() < 2 {
            return None;
        }
        let first = pivots[pivots.len() - 2];
        let second = pivots[pivots.len() - 1];

        let first_osc = osc[first.index];
        let second_osc = osc[second.index];

        let diverges = match kind {
            // Price makes a lower low while momentum makes a higher low
            PivotKind::Low => second.price < first.price && second_osc > first_osc,
            // Price makes a higher high while momentum makes a lower high
            PivotKind::High => second.price > first.price && second_osc < first_osc,
        };
        if !diverges {
            return None;
        }

        let divergence_kind = match kind {
            PivotKind::Low => DivergenceKind::Bullish,
            PivotKind::High => DivergenceKind::Bearish,
        };
        let strength = self.score_strength(window, osc, &first, &second, first_osc, second_osc);
        if strength < self.min_strength {
            debug!(
                kind = %divergence_kind,
                strength,
                min = self.min_strength,
                "divergence below strength threshold, discarded"
            );
            return None;
        }

        Some(DivergenceEvent {
            kind: divergence_kind,
            first_pivot: first,
            second_pivot: second,
            first_oscillator: first_osc,
            second_oscillator: second_osc,
            price_delta: second.price - first.price,
            oscillator_delta: second_osc - first_osc,
            strength,
        })
    }

    /// Confirmed local extrema: index `i` qualifies when its price is the
    /// extreme of `[i - radius, i + radius]`. Requiring the full right
    /// neighborhood also excludes the newest `radius` candles, which cannot
    /// be confirmed yet.
    fn find_pivots(&self, window: &[Candle], kind: PivotKind) -> Vec<PivotPoint> {
        let m = self.pivot_radius;
        let mut pivots = Vec::new();
        for i in m..window.len() - m {
            let price = Self::pivot_price(&window[i], kind);
            let neighborhood = &window[i - m..=i + m];
            let qualifies = match kind {
                PivotKind::High => neighborhood
                    .iter()
                    .all(|c| Self::pivot_price(c, kind) <= price),
                PivotKind::Low => neighborhood
                    .iter()
                    .all(|c| Self::pivot_price(c, kind) >= price),
            };
            if qualifies {
                pivots.push(PivotPoint { index: i, time: window[i].open_time, price, kind });
            }
        }
        pivots
    }

    fn pivot_price(candle: &Candle, kind: PivotKind) -> f64 {
        match kind {
            PivotKind::High => candle.high,
            PivotKind::Low => candle.low,
        }
    }

    /// Mean of the price delta and oscillator delta, each normalized by its
    /// full range over the window, clipped to [0, 1].
    fn score_strength(
        &self,
        window: &[Candle],
        osc: &[f64],
        first: &PivotPoint,
        second: &PivotPoint,
        first_osc: f64,
        second_osc: f64,
    ) -> f64 {
        let window_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let window_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let price_range = window_high - window_low;

        let osc_high = osc.iter().copied().fold(f64::MIN, f64::max);
        let osc_low = osc.iter().copied().fold(f64::MAX, f64::min);
        let osc_range = osc_high - osc_low;

        let price_part = if price_range > 0.0 {
            (second.price - first.price).abs() / price_range
        } else {
            0.0
        };
        let osc_part = if osc_range > 0.0 {
            (second_osc - first_osc).abs() / osc_range
        } else {
            0.0
        };

        ((price_part + osc_part) / 2.0).clamp(0.0, 1.0)
    }
}
