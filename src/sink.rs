//! Signal delivery to downstream consumers.
//!
//! The engine only defines the `Signal` shape; delivery mechanics live
//! behind `SignalSink`. Two implementations ship: a tracing sink that logs
//! every decision, and a broadcast sink that fans actionable signals out to
//! any number of subscribers.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::signal_core::fusion::{Signal, SignalDirection};

pub trait SignalSink: Send {
    fn publish(&mut self, signal: &Signal);
}

/// Logs actionable signals at info, quiet cycles at debug.
#[derive(Debug, Default)]
pub struct LogSink;

impl SignalSink for LogSink {
    fn publish(&mut self, signal: &Signal) {
        match signal.direction {
            SignalDirection::None => {
                debug!(symbol = %signal.symbol, "no entry this cycle");
            }
            direction => {
                let divergence = signal
                    .evidence
                    .divergence
                    .map(|d| format!("{} (strength {:.2})", d.kind, d.strength))
                    .unwrap_or_else(|| "none".to_string());
                info!(
                    symbol = %signal.symbol,
                    %direction,
                    confidence = signal.confidence,
                    divergence = %divergence,
                    "trade signal"
                );
            }
        }
    }
}

/// Fans actionable signals out over a tokio broadcast channel. Quiet cycles
/// are not forwarded; subscribers only see entries.
pub struct BroadcastSink {
    tx: broadcast::Sender<Signal>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Signal>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl SignalSink for BroadcastSink {
    fn publish(&mut self, signal: &Signal) {
        if signal.direction == SignalDirection::None {
            return;
        }
        // Send only fails with zero receivers; that is fine for a broadcast
        let _ = self.tx.send(signal.clone());
    }
}

/// Fan-out to several sinks, e.g. log + broadcast.
pub struct MultiSink {
    sinks: Vec<Box<dyn SignalSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn SignalSink>>) -> Self {
        Self { sinks }
    }
}

impl SignalSink for MultiSink {
    fn publish(&mut self, signal: &Signal) {
        for sink in &mut self.sinks {
            sink.publish(signal);
        }
    }
}
