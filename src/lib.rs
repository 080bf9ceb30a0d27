// Library crate - multi-timeframe trend + divergence signal engine

pub mod binance;
pub mod config;
pub mod error;
pub mod runner;
pub mod signal_core;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use error::EngineError;
pub use runner::Runner;
pub use signal_core::{Signal, SignalDirection, SymbolPipeline};
pub use sink::{BroadcastSink, LogSink, MultiSink, SignalSink};
