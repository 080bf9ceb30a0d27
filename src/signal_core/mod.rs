//! Signal Core - multi-timeframe signal-fusion engine
//!
//! The algorithmic heart of the crate:
//! - Candle series buffering per (symbol, timeframe)
//! - Incremental EMA + momentum oscillator computation
//! - Macro trend classification with hysteresis
//! - Micro price-vs-momentum divergence detection
//! - Signal fusion ("follow the big trend, fade the small move")
//! - Per-symbol pipeline orchestration

pub mod candles;
pub mod divergence;
pub mod fusion;
pub mod indicators;
pub mod pipeline;
pub mod trend;

// Re-export commonly used types
pub use candles::{Candle, CandleSeries, Timeframe};
pub use divergence::{DivergenceDetector, DivergenceEvent, DivergenceKind, PivotKind, PivotPoint};
pub use fusion::{FuserConfig, FuserState, FusionPolicy, Signal, SignalDirection, SignalFuser};
pub use indicators::{EmaState, IndicatorEngine, IndicatorSnapshot, WilderOscillator};
pub use pipeline::{PipelineSnapshot, SymbolPipeline};
pub use trend::{TrendClassifier, TrendDirection, TrendState};
