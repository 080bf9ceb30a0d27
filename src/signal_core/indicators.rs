//! Incremental indicator state: EMA pair + RSI-style momentum oscillator.
//!
//! Every update is O(1) per new finalized candle. Values are seeded from a
//! simple average over the first `period` observations and never recomputed
//! from the full history. Output stays "not ready" (`None`) until the
//! warm-up completes so callers cannot mistake warm-up for a real value.

use serde::Serialize;

/// Exponential moving average, seeded by the SMA of the first `period`
/// closes, then `ema = close * k + prev * (1 - k)` with `k = 2/(period+1)`.
#[derive(Debug, Clone)]
pub struct EmaState {
    period: usize,
    k: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                self.value = Some(close * self.k + prev * (1.0 - self.k));
            }
            None => {
                self.seed_sum += close;
                self.seen += 1;
                if self.seen == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// RSI-style momentum oscillator with Wilder smoothing.
///
/// Seeded by the average gain/loss of the first `period` candle-to-candle
/// changes, then `avg = (avg_prev * (period - 1) + change) / period`.
#[derive(Debug, Clone)]
pub struct WilderOscillator {
    period: usize,
    prev_close: Option<f64>,
    gain_sum: f64,
    loss_sum: f64,
    changes_seen: usize,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl WilderOscillator {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            gain_sum: 0.0,
            loss_sum: 0.0,
            changes_seen: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if self.value.is_none() {
            self.gain_sum += gain;
            self.loss_sum += loss;
            self.changes_seen += 1;
            if self.changes_seen == self.period {
                self.avg_gain = self.gain_sum / self.period as f64;
                self.avg_loss = self.loss_sum / self.period as f64;
                self.value = Some(Self::oscillator_value(self.avg_gain, self.avg_loss));
            }
        } else {
            let n = self.period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
            self.value = Some(Self::oscillator_value(self.avg_gain, self.avg_loss));
        }
        self.value
    }

    fn oscillator_value(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            // No losses at all: flat price reads neutral, pure gains read 100
            if avg_gain == 0.0 {
                return 50.0;
            }
            return 100.0;
        }
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Point-in-time view of all indicator outputs, only available once every
/// component has warmed up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub oscillator: f64,
}

/// Incremental indicator computation over one candle series.
///
/// Keeps a bounded tail of oscillator values so the divergence detector can
/// line them up against the candle window (one oscillator value is recorded
/// per finalized candle once the oscillator is ready).
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    fast: EmaState,
    slow: EmaState,
    oscillator: WilderOscillator,
    osc_tail: Vec<f64>,
    tail_capacity: usize,
}

impl IndicatorEngine {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        oscillator_period: usize,
        tail_capacity: usize,
    ) -> Self {
        Self {
            fast: EmaState::new(fast_period),
            slow: EmaState::new(slow_period),
            oscillator: WilderOscillator::new(oscillator_period),
            osc_tail: Vec::with_capacity(tail_capacity),
            tail_capacity,
        }
    }

    /// Advance all indicator state by one finalized close.
    pub fn on_close(&mut self, close: f64) {
        self.fast.update(close);
        self.slow.update(close);
        if let Some(value) = self.oscillator.update(close) {
            self.osc_tail.push(value);
            if self.osc_tail.len() > self.tail_capacity {
                self.osc_tail.remove(0);
            }
        }
    }

    /// `None` until every indicator has observed its warm-up period.
    pub fn snapshot(&self) -> Option<IndicatorSnapshot> {
        Some(IndicatorSnapshot {
            fast_ema: self.fast.value()?,
            slow_ema: self.slow.value()?,
            oscillator: self.oscillator.value()?,
        })
    }

    /// Last `k` oscillator values, oldest first. The final element lines up
    /// with the latest finalized candle.
    pub fn oscillator_tail(&self, k: usize) -> &[f64] {
        let start = self.osc_tail.len().saturating_sub(k);
        &self.osc_tail[start..]
    }
}
