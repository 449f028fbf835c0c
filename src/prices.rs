// src/prices.rs
use crate::alerts::evaluator::AlertEvaluator;
use crate::database::models::{NewTick, Tick};
use crate::database::TickStore;
use crate::error::{AppError, Result};
use crate::notifier::broadcast::{BroadcastEvent, BroadcastHub};
use crate::utils::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// How far a tick's own timestamp may sit from the receive time, either way.
pub const MAX_CLOCK_SKEW_MS: i64 = 30_000;

/// Body of a tick submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickInput {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
}

impl TickInput {
    pub fn validate(&self, now_ms: i64, max_skew_ms: i64) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(AppError::validation("symbol must not be empty"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(AppError::validation("price must be a finite, non-negative number"));
        }
        let skew = self.timestamp.saturating_sub(now_ms);
        if skew.saturating_abs() > max_skew_ms {
            return Err(AppError::validation(format!(
                "timestamp {} is {}ms away from server time {}",
                self.timestamp, skew, now_ms
            )));
        }
        Ok(())
    }
}

/// Tick ingestion plus the read side of the tick log.
pub struct PriceService {
    ticks: Arc<dyn TickStore>,
    evaluator: Arc<AlertEvaluator>,
    hub: BroadcastHub,
    clock: Arc<dyn Clock>,
    max_skew_ms: i64,
}

impl PriceService {
    pub fn new(
        ticks: Arc<dyn TickStore>,
        evaluator: Arc<AlertEvaluator>,
        hub: BroadcastHub,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ticks,
            evaluator,
            hub,
            clock,
            max_skew_ms: MAX_CLOCK_SKEW_MS,
        }
    }

    pub fn with_max_skew_ms(mut self, max_skew_ms: i64) -> Self {
        self.max_skew_ms = max_skew_ms;
        self
    }

    /// Validates, persists, evaluates alerts and broadcasts a price update.
    /// Evaluation failures are logged; the tick stays ingested.
    #[instrument(skip(self, input), fields(symbol = %input.symbol))]
    pub async fn ingest_tick(&self, input: TickInput) -> Result<Tick> {
        let now = self.clock.now_ms();
        input.validate(now, self.max_skew_ms)?;

        let tick = self
            .ticks
            .append_tick(NewTick {
                symbol: input.symbol.trim().to_string(),
                price: input.price,
                timestamp: input.timestamp,
                received_at: now,
            })
            .await?;
        debug!("Stored tick #{} {} @ {}", tick.seq, tick.price, tick.timestamp);

        match self.evaluator.evaluate_tick(&tick, now).await {
            Ok(fired) if !fired.is_empty() => info!("Tick #{} fired {} alerts", tick.seq, fired.len()),
            Ok(_) => {}
            Err(e) => error!("Alert evaluation failed for tick #{}: {}", tick.seq, e),
        }

        self.hub.publish(BroadcastEvent::PriceUpdate {
            symbol: tick.symbol.clone(),
            price: tick.price,
            timestamp: tick.timestamp,
        });

        Ok(tick)
    }

    /// None when the symbol has no retained ticks.
    pub async fn latest_price(&self, symbol: &str) -> Result<Option<Tick>> {
        self.ticks.latest_tick(symbol).await
    }

    /// Ticks with `start_ms <= timestamp <= end_ms`, oldest first.
    pub async fn price_history(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        if start_ms > end_ms {
            return Err(AppError::validation("startTime must not be after endTime"));
        }
        self.ticks
            .ticks_between(symbol, start_ms, end_ms.saturating_add(1))
            .await
    }
}
