//! Per-tick orchestration over all symbol pipelines.
//!
//! The runner is driven by an external scheduler (the binary's poll loop).
//! On each tick it pulls the trailing candle windows for every symbol,
//! ingests only what is new and finalized, runs one analysis cycle and
//! publishes the result. One symbol's failure never touches another's
//! pipeline.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::binance::CandleSource;
use crate::config::Config;
use crate::error::EngineError;
use crate::signal_core::candles::Candle;
use crate::signal_core::pipeline::{PipelineSnapshot, SymbolPipeline};
use crate::sink::SignalSink;

pub struct Runner<S: CandleSource, K: SignalSink> {
    source: S,
    sink: K,
    pipelines: Vec<SymbolPipeline>,
    klines_limit: usize,
}

impl<S: CandleSource, K: SignalSink> Runner<S, K> {
    pub fn new(config: &Config, source: S, sink: K) -> Result<Self, EngineError> {
        config.validate()?;
        let pipelines = config
            .symbols
            .iter()
            .map(|symbol| SymbolPipeline::new(symbol, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source,
            sink,
            pipelines,
            klines_limit: config.klines_limit,
        })
    }

    /// Run one full analysis cycle across every symbol.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) {
        let Self { source, sink, pipelines, klines_limit } = self;
        for pipeline in pipelines.iter_mut() {
            if let Err(err) = step_symbol(source, sink, pipeline, *klines_limit, now).await {
                error!(symbol = %pipeline.symbol(), "analysis cycle failed: {err:#}");
            }
        }
    }

    /// Immutable state views for all pipelines (read path).
    pub fn snapshots(&self) -> Vec<PipelineSnapshot> {
        self.pipelines.iter().map(|p| p.snapshot()).collect()
    }
}

async fn step_symbol<S: CandleSource, K: SignalSink>(
    source: &S,
    sink: &mut K,
    pipeline: &mut SymbolPipeline,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    let symbol = pipeline.symbol().to_string();

    let macro_candles = source
        .fetch_candles(&symbol, pipeline.macro_timeframe(), limit)
        .await
        .with_context(|| format!("macro fetch failed for {symbol}"))?;
    let micro_candles = source
        .fetch_candles(&symbol, pipeline.micro_timeframe(), limit)
        .await
        .with_context(|| format!("micro fetch failed for {symbol}"))?;

    let applied_macro = ingest(
        &macro_candles,
        now,
        pipeline.last_macro_open_time(),
        |candle| pipeline.apply_macro(candle),
    );
    let applied_micro = ingest(
        &micro_candles,
        now,
        pipeline.last_micro_open_time(),
        |candle| pipeline.apply_micro(candle),
    );
    debug!(%symbol, applied_macro, applied_micro, "candles ingested");

    let signal = pipeline.analyze(now);
    sink.publish(&signal);
    Ok(())
}

/// Feed a fetched batch into one series. The fetch returns a trailing window
/// each tick, so already-seen candles (open time at or before the series
/// tail) are skipped silently, and the still-open last candle (close time in
/// the future) is dropped: indicators only ever see finalized candles.
/// Genuinely out-of-order rows are logged and dropped.
fn ingest<F>(
    batch: &[Candle],
    now: DateTime<Utc>,
    last_open: Option<DateTime<Utc>>,
    mut apply: F,
) -> usize
where
    F: FnMut(Candle) -> Result<(), EngineError>,
{
    let mut applied = 0;
    let mut tail = last_open;
    for candle in batch {
        if candle.close_time > now {
            continue; // still open
        }
        if let Some(tail) = tail {
            if candle.open_time <= tail {
                continue; // overlap with already-ingested history
            }
        }
        match apply(*candle) {
            Ok(()) => {
                tail = Some(candle.open_time);
                applied += 1;
            }
            Err(err) => warn!("candle dropped: {err}"),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_core::candles::Timeframe;
    use crate::signal_core::fusion::Signal;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn candle_at(base: DateTime<Utc>, step: i64, tf_minutes: i64, close: f64) -> Candle {
        let open_time = base + Duration::minutes(step * tf_minutes);
        Candle {
            open_time,
            close_time: open_time + Duration::minutes(tf_minutes),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1.0,
        }
    }

    struct FixedSource {
        by_timeframe: HashMap<Timeframe, Vec<Candle>>,
    }

    #[async_trait]
    impl CandleSource for FixedSource {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            timeframe: Timeframe,
            _limit: usize,
        ) -> Result<Vec<Candle>> {
            Ok(self.by_timeframe.get(&timeframe).cloned().unwrap_or_default())
        }
    }

    #[derive(Clone, Default)]
    struct CaptureSink {
        signals: Arc<Mutex<Vec<Signal>>>,
    }

    impl SignalSink for CaptureSink {
        fn publish(&mut self, signal: &Signal) {
            self.signals.lock().unwrap().push(signal.clone());
        }
    }

    fn test_config() -> Config {
        Config {
            symbols: vec!["ETHUSDT".to_string()],
            macro_timeframe: Timeframe::hours(2),
            micro_timeframe: Timeframe::minutes(5),
            ema_fast_period: 3,
            ema_slow_period: 6,
            oscillator_period: 3,
            trend_confirm_bars: 2,
            ..Config::default()
        }
    }

    #[test]
    fn test_ingest_skips_open_and_overlapping_candles() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let batch: Vec<Candle> = (0..5).map(|i| candle_at(base, i, 5, 100.0)).collect();
        // "now" is mid way through candle 3, so candles 3 and 4 are open;
        // candle 0 was already ingested on a previous tick
        let now = base + Duration::minutes(17);
        let mut seen = Vec::new();
        let applied = ingest(&batch, now, Some(batch[0].open_time), |c| {
            seen.push(c.open_time);
            Ok(())
        });
        assert_eq!(applied, 2);
        assert_eq!(seen, vec![batch[1].open_time, batch[2].open_time]);
    }

    #[tokio::test]
    async fn test_cycle_is_idempotent_across_repeated_fetch_windows() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let macro_batch: Vec<Candle> =
            (0..10).map(|i| candle_at(base, i, 120, 100.0 + i as f64)).collect();
        let micro_batch: Vec<Candle> =
            (0..30).map(|i| candle_at(base, i, 5, 100.0 + (i % 4) as f64)).collect();

        let source = FixedSource {
            by_timeframe: HashMap::from([
                (Timeframe::hours(2), macro_batch),
                (Timeframe::minutes(5), micro_batch),
            ]),
        };
        let sink = CaptureSink::default();
        let signals = sink.signals.clone();
        let mut runner = Runner::new(&test_config(), source, sink).unwrap();

        let now = base + Duration::hours(20);
        runner.run_cycle(now).await;
        let first = runner.snapshots();

        // Same trailing window again: nothing new to ingest, state unchanged
        runner.run_cycle(now + Duration::minutes(1)).await;
        let second = runner.snapshots();

        let t1 = first[0].trend.unwrap();
        let t2 = second[0].trend.unwrap();
        assert_eq!(t1.fast_ema, t2.fast_ema);
        assert_eq!(
            t1.consecutive_confirming_bars,
            t2.consecutive_confirming_bars
        );
        assert_eq!(signals.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_symbol_failure_does_not_stop_others() {
        struct FlakySource;

        #[async_trait]
        impl CandleSource for FlakySource {
            async fn fetch_candles(
                &self,
                symbol: &str,
                _timeframe: Timeframe,
                _limit: usize,
            ) -> Result<Vec<Candle>> {
                if symbol == "BADUSDT" {
                    anyhow::bail!("exchange says no");
                }
                Ok(Vec::new())
            }
        }

        let mut config = test_config();
        config.symbols = vec!["BADUSDT".to_string(), "ETHUSDT".to_string()];
        let sink = CaptureSink::default();
        let signals = sink.signals.clone();
        let mut runner = Runner::new(&config, FlakySource, sink).unwrap();

        runner.run_cycle(Utc::now()).await;

        // The healthy symbol still produced a (none) signal
        let published = signals.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].symbol, "ETHUSDT");
    }
}
