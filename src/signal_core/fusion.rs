//! Signal fusion: "follow the big trend, fade the small move".
//!
//! An entry requires a confirmed macro trend plus a micro divergence that
//! implies the recent counter-move is reversing back toward that trend:
//! uptrend + bullish divergence = long, downtrend + bearish divergence =
//! short. Every other combination yields a none-direction signal.
//!
//! Per-symbol cycle: IDLE -> TREND_CONFIRMED -> DIVERGENCE_WATCH ->
//! SIGNAL_EMITTED -> COOLDOWN -> TREND_CONFIRMED (or back to IDLE when the
//! trend loses confirmation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::divergence::{DivergenceEvent, DivergenceKind};
use super::trend::{TrendDirection, TrendState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalDirection {
    Long,
    Short,
    None,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Long => write!(f, "LONG"),
            SignalDirection::Short => write!(f, "SHORT"),
            SignalDirection::None => write!(f, "NONE"),
        }
    }
}

/// Supporting evidence attached to every signal.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvidence {
    pub trend: Option<TrendState>,
    pub divergence: Option<DivergenceEvent>,
}

/// The engine's final output: a directional recommendation with confidence.
/// Emitted, never stored; persistence is a downstream concern.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub evidence: SignalEvidence,
}

/// Fuser position in the per-symbol cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FuserState {
    Idle,
    TrendConfirmed,
    DivergenceWatch,
    SignalEmitted,
    Cooldown,
}

impl fmt::Display for FuserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuserState::Idle => write!(f, "IDLE"),
            FuserState::TrendConfirmed => write!(f, "TREND_CONFIRMED"),
            FuserState::DivergenceWatch => write!(f, "DIVERGENCE_WATCH"),
            FuserState::SignalEmitted => write!(f, "SIGNAL_EMITTED"),
            FuserState::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// How strictly trend and divergence must line up before an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Buy dips in uptrends, short rallies in downtrends (the default
    /// literal reading of the rule).
    TrendPullback,
    /// TrendPullback plus a momentum-extreme gate: the divergence's second
    /// pivot must print beyond the classic 30/70 oscillator bands.
    StrictAlignment,
}

const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;

/// Configuration for signal fusion
#[derive(Debug, Clone)]
pub struct FuserConfig {
    /// Hysteresis length used to normalize trend persistence for confidence
    pub trend_confirm_bars: u32,
    /// Analysis cycles to suppress further entries after an emission
    pub cooldown_bars: u32,
    pub policy: FusionPolicy,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            trend_confirm_bars: 3,
            cooldown_bars: 3,
            policy: FusionPolicy::TrendPullback,
        }
    }
}

/// Combines trend state and divergence events into at most one actionable
/// signal per cycle.
#[derive(Debug, Clone)]
pub struct SignalFuser {
    config: FuserConfig,
    state: FuserState,
    cooldown_left: u32,
    /// Identity of the last emitted divergence (kind + second pivot time);
    /// the same underlying event never re-fires.
    last_event: Option<(DivergenceKind, DateTime<Utc>)>,
}

impl SignalFuser {
    pub fn new(config: FuserConfig) -> Self {
        Self {
            config,
            state: FuserState::Idle,
            cooldown_left: 0,
            last_event: None,
        }
    }

    pub fn state(&self) -> FuserState {
        self.state
    }

    /// Run one fusion cycle. Always returns a signal; direction `None`
    /// carries whatever evidence was available.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        now: DateTime<Utc>,
        trend: Option<&TrendState>,
        events: &[DivergenceEvent],
        stale: bool,
    ) -> Signal {
        self.advance_cycle();

        let Some(trend_state) = trend.filter(|t| t.is_confirmed()) else {
            if self.state != FuserState::Idle {
                debug!(symbol, "trend unconfirmed, fuser back to IDLE");
            }
            self.state = FuserState::Idle;
            return self.none_signal(symbol, now, trend, events);
        };

        if self.state == FuserState::Idle {
            self.state = FuserState::TrendConfirmed;
        }

        let Some(event) = self.aligned_event(trend_state.direction, events) else {
            self.state = FuserState::DivergenceWatch;
            return self.none_signal(symbol, now, trend, events);
        };

        if stale {
            warn!(symbol, "qualifying divergence while feed is stale, signal suppressed");
            return self.none_signal(symbol, now, trend, events);
        }

        let key = (event.kind, event.second_pivot.time);
        if self.state == FuserState::Cooldown || self.last_event == Some(key) {
            debug!(
                symbol,
                kind = %event.kind,
                pivot_time = %event.second_pivot.time,
                "entry suppressed (cooldown / already-emitted event)"
            );
            return self.none_signal(symbol, now, trend, events);
        }

        // Alignment already checked: bullish pairs with uptrend, bearish
        // with downtrend
        let direction = match event.kind {
            DivergenceKind::Bullish => SignalDirection::Long,
            DivergenceKind::Bearish => SignalDirection::Short,
        };
        let confidence = self.confidence(trend_state, &event);

        self.state = FuserState::SignalEmitted;
        self.cooldown_left = self.config.cooldown_bars;
        self.last_event = Some(key);

        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timestamp: now,
            direction,
            confidence,
            evidence: SignalEvidence {
                trend: Some(*trend_state),
                divergence: Some(event),
            },
        };
        info!(
            symbol,
            direction = %signal.direction,
            confidence = signal.confidence,
            divergence = %event.kind,
            strength = event.strength,
            trend_bars = trend_state.consecutive_confirming_bars,
            "signal emitted"
        );
        signal
    }

    /// Tick cooldown at the top of each cycle and settle the post-emission
    /// state transitions.
    fn advance_cycle(&mut self) {
        match self.state {
            FuserState::SignalEmitted => {
                self.state = if self.cooldown_left > 0 {
                    FuserState::Cooldown
                } else {
                    FuserState::TrendConfirmed
                };
            }
            FuserState::Cooldown => {
                self.cooldown_left = self.cooldown_left.saturating_sub(1);
                if self.cooldown_left == 0 {
                    self.state = FuserState::TrendConfirmed;
                }
            }
            _ => {}
        }
    }

    /// Pick the divergence that fades the recent micro move back toward the
    /// macro trend, applying the configured policy gate.
    fn aligned_event(
        &self,
        direction: TrendDirection,
        events: &[DivergenceEvent],
    ) -> Option<DivergenceEvent> {
        let wanted = match direction {
            TrendDirection::Up => DivergenceKind::Bullish,
            TrendDirection::Down => DivergenceKind::Bearish,
            TrendDirection::Flat => return None,
        };
        let event = events.iter().find(|e| e.kind == wanted)?;

        if self.config.policy == FusionPolicy::StrictAlignment {
            let at_extreme = match event.kind {
                DivergenceKind::Bullish => event.second_oscillator <= OVERSOLD,
                DivergenceKind::Bearish => event.second_oscillator >= OVERBOUGHT,
            };
            if !at_extreme {
                return None;
            }
        }
        Some(*event)
    }

    /// Monotonic blend of divergence strength and trend persistence,
    /// clipped to [0, 1].
    fn confidence(&self, trend: &TrendState, event: &DivergenceEvent) -> f64 {
        let trend_part = (trend.consecutive_confirming_bars as f64
            / (2.0 * self.config.trend_confirm_bars as f64))
            .min(1.0);
        ((event.strength + trend_part) / 2.0).clamp(0.0, 1.0)
    }

    fn none_signal(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        trend: Option<&TrendState>,
        events: &[DivergenceEvent],
    ) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timestamp: now,
            direction: SignalDirection::None,
            confidence: 0.0,
            evidence: SignalEvidence {
                trend: trend.copied(),
                divergence: events.first().copied(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_core::divergence::{PivotKind, PivotPoint};
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, minute / 60, minute % 60, 0).unwrap()
    }

    fn trend(direction: TrendDirection, bars: u32) -> TrendState {
        TrendState {
            direction,
            fast_ema: 101.0,
            slow_ema: 100.0,
            consecutive_confirming_bars: bars,
        }
    }

    fn event(kind: DivergenceKind, strength: f64, pivot_minute: u32) -> DivergenceEvent {
        let (pivot_kind, first_price, second_price, first_osc, second_osc) = match kind {
            DivergenceKind::Bullish => (PivotKind::Low, 50.0, 48.0, 30.0, 35.0),
            DivergenceKind::Bearish => (PivotKind::High, 100.0, 103.0, 75.0, 62.0),
        };
        DivergenceEvent {
            kind,
            first_pivot: PivotPoint {
                index: 2,
                time: t(pivot_minute.saturating_sub(20)),
                price: first_price,
                kind: pivot_kind,
            },
            second_pivot: PivotPoint {
                index: 6,
                time: t(pivot_minute),
                price: second_price,
                kind: pivot_kind,
            },
            first_oscillator: first_osc,
            second_oscillator: second_osc,
            price_delta: second_price - first_price,
            oscillator_delta: second_osc - first_osc,
            strength,
        }
    }

    #[test]
    fn test_uptrend_plus_bullish_divergence_emits_long() {
        let mut fuser = SignalFuser::new(FuserConfig {
            trend_confirm_bars: 5,
            cooldown_bars: 3,
            policy: FusionPolicy::TrendPullback,
        });
        let up = trend(TrendDirection::Up, 5);
        let events = [event(DivergenceKind::Bullish, 0.8, 30)];

        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&up), &events, false);
        assert_eq!(signal.direction, SignalDirection::Long);
        // strength 0.8, trend part 5/10 = 0.5 -> mean 0.65
        assert!((signal.confidence - 0.65).abs() < 1e-9);
        assert!(signal.evidence.divergence.is_some());
        assert_eq!(fuser.state(), FuserState::SignalEmitted);
    }

    #[test]
    fn test_downtrend_plus_bearish_divergence_emits_short() {
        let mut fuser = SignalFuser::new(FuserConfig::default());
        let down = trend(TrendDirection::Down, 4);
        let events = [event(DivergenceKind::Bearish, 0.5, 30)];
        let signal = fuser.evaluate("BTCUSDT", t(35), Some(&down), &events, false);
        assert_eq!(signal.direction, SignalDirection::Short);
    }

    #[test]
    fn test_disagreement_yields_none() {
        let mut fuser = SignalFuser::new(FuserConfig::default());
        let down = trend(TrendDirection::Down, 4);
        let events = [event(DivergenceKind::Bullish, 0.9, 30)];
        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&down), &events, false);
        assert_eq!(signal.direction, SignalDirection::None);
        assert_eq!(fuser.state(), FuserState::DivergenceWatch);
    }

    #[test]
    fn test_unconfirmed_trend_never_emits() {
        let mut fuser = SignalFuser::new(FuserConfig::default());
        let flat = trend(TrendDirection::Flat, 1);
        let events = [event(DivergenceKind::Bullish, 1.0, 30)];

        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&flat), &events, false);
        assert_eq!(signal.direction, SignalDirection::None);
        let signal = fuser.evaluate("ETHUSDT", t(40), None, &events, false);
        assert_eq!(signal.direction, SignalDirection::None);
        assert_eq!(fuser.state(), FuserState::Idle);
    }

    #[test]
    fn test_same_event_suppressed_inside_cooldown() {
        let mut fuser = SignalFuser::new(FuserConfig {
            trend_confirm_bars: 5,
            cooldown_bars: 3,
            policy: FusionPolicy::TrendPullback,
        });
        let up = trend(TrendDirection::Up, 5);
        let events = [event(DivergenceKind::Bullish, 0.8, 30)];

        let first = fuser.evaluate("ETHUSDT", t(35), Some(&up), &events, false);
        assert_eq!(first.direction, SignalDirection::Long);

        // Identical event on the immediate next cycle does not re-emit
        let second = fuser.evaluate("ETHUSDT", t(40), Some(&up), &events, false);
        assert_eq!(second.direction, SignalDirection::None);
        assert_eq!(fuser.state(), FuserState::Cooldown);
    }

    #[test]
    fn test_same_event_never_reemits_after_cooldown() {
        let mut fuser = SignalFuser::new(FuserConfig {
            trend_confirm_bars: 5,
            cooldown_bars: 1,
            policy: FusionPolicy::TrendPullback,
        });
        let up = trend(TrendDirection::Up, 5);
        let events = [event(DivergenceKind::Bullish, 0.8, 30)];

        fuser.evaluate("ETHUSDT", t(35), Some(&up), &events, false);
        fuser.evaluate("ETHUSDT", t(40), Some(&up), &events, false);
        let third = fuser.evaluate("ETHUSDT", t(45), Some(&up), &events, false);
        assert_eq!(third.direction, SignalDirection::None);

        // A fresh second pivot is a new event and may fire again
        let fresh = [event(DivergenceKind::Bullish, 0.8, 55)];
        let fourth = fuser.evaluate("ETHUSDT", t(60), Some(&up), &fresh, false);
        assert_eq!(fourth.direction, SignalDirection::Long);
    }

    #[test]
    fn test_stale_feed_suppresses_emission() {
        let mut fuser = SignalFuser::new(FuserConfig::default());
        let up = trend(TrendDirection::Up, 5);
        let events = [event(DivergenceKind::Bullish, 0.8, 30)];
        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&up), &events, true);
        assert_eq!(signal.direction, SignalDirection::None);
        // The event was not consumed; it may fire once the feed recovers
        let signal = fuser.evaluate("ETHUSDT", t(40), Some(&up), &events, false);
        assert_eq!(signal.direction, SignalDirection::Long);
    }

    #[test]
    fn test_strict_alignment_requires_oscillator_extreme() {
        let mut fuser = SignalFuser::new(FuserConfig {
            trend_confirm_bars: 3,
            cooldown_bars: 3,
            policy: FusionPolicy::StrictAlignment,
        });
        let up = trend(TrendDirection::Up, 5);

        // Second-pivot oscillator at 35: not oversold, gated out
        let mild = [event(DivergenceKind::Bullish, 0.8, 30)];
        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&up), &mild, false);
        assert_eq!(signal.direction, SignalDirection::None);

        let mut deep = event(DivergenceKind::Bullish, 0.8, 30);
        deep.second_oscillator = 25.0;
        let signal = fuser.evaluate("ETHUSDT", t(40), Some(&up), &[deep], false);
        assert_eq!(signal.direction, SignalDirection::Long);
    }

    #[test]
    fn test_confidence_clipped_to_unit_interval() {
        let mut fuser = SignalFuser::new(FuserConfig {
            trend_confirm_bars: 2,
            cooldown_bars: 0,
            policy: FusionPolicy::TrendPullback,
        });
        let up = trend(TrendDirection::Up, 100);
        let events = [event(DivergenceKind::Bullish, 1.0, 30)];
        let signal = fuser.evaluate("ETHUSDT", t(35), Some(&up), &events, false);
        assert!(signal.confidence <= 1.0);
        assert!(signal.confidence > 0.0);
    }
}
