use crate::database::models::{Candle, Tick};
use crate::database::{CandleStore, TickStore};
use crate::error::{AppError, Result};
use crate::processor::timeframe::Timeframe;
use crate::utils::utils::{format_timestamp_ms, measure_time};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

pub const MAX_CANDLE_QUERY_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub timeframes: Vec<Timeframe>,
    /// Candles of history rebuilt for a pair that has none yet.
    pub default_window_count: i64,
    /// Ticks may arrive this late; buckets they could still land in are rebuilt.
    pub late_tick_allowance_ms: i64,
    pub concurrency: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeframes: Timeframe::ALL.to_vec(),
            default_window_count: 100,
            late_tick_allowance_ms: 30_000,
            concurrency: num_cpus::get(),
        }
    }
}

/// Summary of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub symbols: usize,
    pub pairs: usize,
    pub candles_written: usize,
    pub failures: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct PairOutcome {
    written: usize,
    failures: usize,
}

/// Groups ticks into OHLC candles for one symbol and timeframe.
/// Input order does not matter: ticks are ordered by timestamp, then arrival.
pub fn build_candles(symbol: &str, timeframe: Timeframe, ticks: &[Tick]) -> Vec<Candle> {
    let mut ordered: Vec<&Tick> = ticks.iter().filter(|t| t.symbol == symbol).collect();
    ordered.sort_by_key(|t| (t.timestamp, t.seq));

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for tick in ordered {
        let bucket_start = timeframe.bucket_start(tick.timestamp);
        buckets
            .entry(bucket_start)
            .and_modify(|c| {
                c.high = c.high.max(tick.price);
                c.low = c.low.min(tick.price);
                c.close = tick.price;
                c.tick_count += 1;
            })
            .or_insert_with(|| Candle {
                symbol: symbol.to_string(),
                timeframe,
                bucket_start,
                open: tick.price,
                high: tick.price,
                low: tick.price,
                close: tick.price,
                tick_count: 1,
            });
    }

    buckets.into_values().collect()
}

pub struct CandleAggregator {
    ticks: Arc<dyn TickStore>,
    candles: Arc<dyn CandleStore>,
    config: AggregatorConfig,
}

impl CandleAggregator {
    pub fn new(ticks: Arc<dyn TickStore>, candles: Arc<dyn CandleStore>, config: AggregatorConfig) -> Self {
        Self { ticks, candles, config }
    }

    /// Rebuilds recent candles for every (symbol, timeframe) pair.
    /// A failing pair or candle write is logged and counted; the rest still run.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now_ms: i64) -> Result<CycleReport> {
        let started = Instant::now();
        let symbols = self.ticks.distinct_symbols().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        info!(
            "Aggregating {} symbols over {} timeframes at {}",
            symbols.len(),
            self.config.timeframes.len(),
            format_timestamp_ms(now_ms)
        );

        let work = symbols.iter().map(|symbol| {
            let semaphore = semaphore.clone();
            async move {
                // Symbols run in parallel up to the limit; a symbol's timeframes run in order.
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Aggregation semaphore closed: {}", e);
                        return Vec::new();
                    }
                };
                let mut outcomes = Vec::with_capacity(self.config.timeframes.len());
                for &timeframe in &self.config.timeframes {
                    outcomes.push(self.aggregate_pair(symbol, timeframe, now_ms).await);
                }
                outcomes
            }
        });

        let results = measure_time("aggregation cycle", join_all(work)).await;

        let mut report = CycleReport {
            symbols: symbols.len(),
            ..Default::default()
        };
        for outcome in results.into_iter().flatten() {
            report.pairs += 1;
            report.candles_written += outcome.written;
            report.failures += outcome.failures;
        }
        report.elapsed = started.elapsed();

        if report.failures > 0 {
            warn!("Aggregation cycle finished with {} failures: {:?}", report.failures, report);
        } else {
            info!("Aggregation cycle wrote {} candles in {:.2?}", report.candles_written, report.elapsed);
        }
        Ok(report)
    }

    async fn aggregate_pair(&self, symbol: &str, timeframe: Timeframe, now_ms: i64) -> PairOutcome {
        let mut outcome = PairOutcome::default();

        // Resume from the newest stored bucket, or look back a full window
        let latest = match self.candles.latest_candle(symbol, timeframe).await {
            Ok(latest) => latest,
            Err(e) => {
                error!("Failed to read latest {} candle for {}: {}", timeframe, symbol, e);
                outcome.failures += 1;
                return outcome;
            }
        };
        let window_start = self.window_start(latest.as_ref(), timeframe, now_ms);

        let ticks = match self.ticks.ticks_between(symbol, window_start, now_ms).await {
            Ok(ticks) => ticks,
            Err(e) => {
                error!("Failed to load ticks for {} {}: {}", symbol, timeframe, e);
                outcome.failures += 1;
                return outcome;
            }
        };

        if ticks.is_empty() {
            debug!("No ticks for {} {} since {}", symbol, timeframe, window_start);
            return outcome;
        }

        for candle in build_candles(symbol, timeframe, &ticks) {
            match self.candles.upsert_candle(&candle).await {
                Ok(()) => outcome.written += 1,
                Err(e) => {
                    error!(
                        "Failed to write {} candle for {} at {}: {}",
                        timeframe,
                        symbol,
                        format_timestamp_ms(candle.bucket_start),
                        e
                    );
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }

    fn window_start(&self, latest: Option<&Candle>, timeframe: Timeframe, now_ms: i64) -> i64 {
        let late_bucket = timeframe.bucket_start(now_ms.saturating_sub(self.config.late_tick_allowance_ms));
        match latest {
            Some(candle) => candle.bucket_start.min(late_bucket),
            None => timeframe.bucket_start(
                now_ms.saturating_sub(timeframe.duration_ms().saturating_mul(self.config.default_window_count)),
            ),
        }
    }

    /// Newest first. `limit` defaults to the configured window and must be 1..=1000.
    pub async fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: Option<usize>) -> Result<Vec<Candle>> {
        let limit = limit.unwrap_or(self.config.default_window_count.max(1) as usize);
        if limit == 0 || limit > MAX_CANDLE_QUERY_LIMIT {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {}",
                MAX_CANDLE_QUERY_LIMIT
            )));
        }
        self.candles.recent_candles(symbol, timeframe, limit).await
    }
}
