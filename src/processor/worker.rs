use crate::alerts::evaluator::AlertEvaluator;
use crate::cache::redis::RedisManager;
use crate::database::Stores;
use crate::processor::aggregator::{CandleAggregator, CycleReport};
use crate::utils::clock::Clock;
use crate::utils::utils::format_timestamp_ms;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const AGGREGATION_LOCK: &str = "aggregation";

// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub aggregation_interval: Duration,
    pub reactivation_interval: Duration,
    pub retention_interval: Duration,
    pub tick_retention: Duration,
    pub subscription_retention: Duration,
    pub lock_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: Duration::from_secs(60),
            reactivation_interval: Duration::from_secs(5),
            retention_interval: Duration::from_secs(600),
            tick_retention: Duration::from_secs(24 * 3600),
            subscription_retention: Duration::from_secs(30 * 24 * 3600),
            lock_ttl: Duration::from_secs(300),
        }
    }
}

/// Lets at most one holder run a cycle at a time.
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

/// Held for the duration of a cycle; releases the guard when dropped.
pub struct CyclePermit {
    guard: Arc<CycleGuard>,
}

impl CycleGuard {
    pub fn try_enter(self: &Arc<Self>) -> Option<CyclePermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit { guard: Arc::clone(self) })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Runs the periodic jobs: candle aggregation, cooldown reactivation and retention.
pub struct Worker {
    aggregator: Arc<CandleAggregator>,
    evaluator: Arc<AlertEvaluator>,
    stores: Stores,
    clock: Arc<dyn Clock>,
    redis: Option<Arc<RedisManager>>,
    config: WorkerConfig,
    aggregation_guard: Arc<CycleGuard>,
}

impl Worker {
    pub fn new(
        aggregator: Arc<CandleAggregator>,
        evaluator: Arc<AlertEvaluator>,
        stores: Stores,
        clock: Arc<dyn Clock>,
        redis: Option<Arc<RedisManager>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            aggregator,
            evaluator,
            stores,
            clock,
            redis,
            config,
            aggregation_guard: Arc::new(CycleGuard::default()),
        }
    }

    /// Runs until `shutdown` flips to true. Every job also runs once right away.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting scheduler: aggregation every {:?}, reactivation every {:?}, retention every {:?}",
            self.config.aggregation_interval, self.config.reactivation_interval, self.config.retention_interval
        );

        let mut aggregation = interval(self.config.aggregation_interval);
        aggregation.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reactivation = interval(self.config.reactivation_interval);
        reactivation.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retention = interval(self.config.retention_interval);
        retention.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = aggregation.tick() => {
                    // Off the loop so reactivation keeps its pace during long cycles
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.run_aggregation_once().await;
                    });
                }
                _ = reactivation.tick() => self.run_reactivation_once().await,
                _ = retention.tick() => self.run_retention_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler shutting down");
        Ok(())
    }

    /// One aggregation pass. Returns None when another pass holds the guard or
    /// the shared lock, or when the pass could not start.
    #[instrument(skip(self))]
    pub async fn run_aggregation_once(&self) -> Option<CycleReport> {
        let _permit = match self.aggregation_guard.try_enter() {
            Some(permit) => permit,
            None => {
                info!("Previous aggregation cycle still running, skipping");
                return None;
            }
        };

        let lock = match &self.redis {
            Some(redis) => {
                let key = redis.lock_key(AGGREGATION_LOCK);
                let token = Uuid::new_v4().to_string();
                match redis.try_acquire_lock(&key, &token, self.config.lock_ttl).await {
                    Ok(true) => Some((redis.clone(), key, token)),
                    Ok(false) => {
                        info!("Aggregation running in another process, skipping");
                        return None;
                    }
                    Err(e) => {
                        warn!("Redis lock unavailable, continuing with local guard only: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let now = self.clock.now_ms();
        let result = self.aggregator.run_cycle(now).await;

        if let Some((redis, key, token)) = lock {
            if let Err(e) = redis.release_lock(&key, &token).await {
                warn!("Failed to release aggregation lock: {}", e);
            }
        }

        match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Aggregation cycle at {} failed: {}", format_timestamp_ms(now), e);
                None
            }
        }
    }

    pub async fn run_reactivation_once(&self) {
        let now = self.clock.now_ms();
        if let Err(e) = self.evaluator.process_due_reactivations(now).await {
            error!("Failed to process due reactivations: {}", e);
        }
    }

    #[instrument(skip(self))]
    pub async fn run_retention_once(&self) {
        let now = self.clock.now_ms();

        let tick_cutoff = now.saturating_sub(self.config.tick_retention.as_millis() as i64);
        match self.stores.ticks.purge_ticks_before(tick_cutoff).await {
            Ok(0) => debug!("No expired ticks"),
            Ok(n) => info!("Purged {} ticks received before {}", n, format_timestamp_ms(tick_cutoff)),
            Err(e) => error!("Failed to purge ticks: {}", e),
        }

        let subscription_cutoff = now.saturating_sub(self.config.subscription_retention.as_millis() as i64);
        match self.stores.subscriptions.purge_subscriptions_before(subscription_cutoff).await {
            Ok(0) => debug!("No expired push subscriptions"),
            Ok(n) => info!("Purged {} push subscriptions idle since before {}", n, format_timestamp_ms(subscription_cutoff)),
            Err(e) => error!("Failed to purge push subscriptions: {}", e),
        }
    }
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            aggregator: Arc::clone(&self.aggregator),
            evaluator: Arc::clone(&self.evaluator),
            stores: self.stores.clone(),
            clock: Arc::clone(&self.clock),
            redis: self.redis.clone(),
            config: self.config.clone(),
            aggregation_guard: Arc::clone(&self.aggregation_guard),
        }
    }
}
