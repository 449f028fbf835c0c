// src/app.rs
use crate::alerts::evaluator::AlertEvaluator;
use crate::alerts::manager::AlertManager;
use crate::alerts::RuleLocks;
use crate::api::{self, AppState};
use crate::cache::redis::RedisManager;
use crate::config::AppConfig;
use crate::database::postgres::PostgresManager;
use crate::database::Stores;
use crate::notifier::broadcast::BroadcastHub;
use crate::notifier::dispatcher::PushDispatcher;
use crate::notifier::push::{PushTransport, WebPushTransport};
use crate::notifier::subscriptions::SubscriptionService;
use crate::notifier::{spawn_dispatch_loop, NotificationQueue, NotificationRequest};
use crate::prices::PriceService;
use crate::processor::aggregator::{CandleAggregator, CycleReport};
use crate::processor::worker::Worker;
use crate::utils::clock::{Clock, SystemClock};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Every long-lived component, wired together.
pub struct Engine {
    pub stores: Stores,
    pub hub: BroadcastHub,
    pub prices: Arc<PriceService>,
    pub aggregator: Arc<CandleAggregator>,
    pub evaluator: Arc<AlertEvaluator>,
    pub alerts: Arc<AlertManager>,
    pub subscriptions: Arc<SubscriptionService>,
    notifications: Option<mpsc::Receiver<NotificationRequest>>,
}

impl Engine {
    pub fn build(config: &AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self> {
        let hub = BroadcastHub::new();
        let locks = Arc::new(RuleLocks::new());
        let (queue, notifications) = NotificationQueue::new(config.alerts.notification_queue_capacity);

        let evaluator = Arc::new(AlertEvaluator::new(stores.rules.clone(), queue, locks.clone()));
        let prices = Arc::new(
            PriceService::new(stores.ticks.clone(), evaluator.clone(), hub.clone(), clock.clone())
                .with_max_skew_ms(config.alerts.max_clock_skew_ms),
        );
        let aggregator = Arc::new(CandleAggregator::new(
            stores.ticks.clone(),
            stores.candles.clone(),
            config.aggregator_config()?,
        ));
        let alerts = Arc::new(AlertManager::new(stores.rules.clone(), locks, clock.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(stores.subscriptions.clone(), clock));

        Ok(Self {
            stores,
            hub,
            prices,
            aggregator,
            evaluator,
            alerts,
            subscriptions,
            notifications: Some(notifications),
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            prices: self.prices.clone(),
            candles: self.aggregator.clone(),
            alerts: self.alerts.clone(),
            subscriptions: self.subscriptions.clone(),
            hub: self.hub.clone(),
        }
    }

    /// Starts the background dispatch task. Only the first call has an effect.
    pub fn start_dispatcher(&mut self, transport: Arc<dyn PushTransport>) -> Option<tokio::task::JoinHandle<()>> {
        let rx = self.notifications.take()?;
        let dispatcher = Arc::new(PushDispatcher::new(
            self.hub.clone(),
            self.stores.subscriptions.clone(),
            transport,
        ));
        Some(spawn_dispatch_loop(rx, dispatcher))
    }

    /// Scheduler over this engine's components.
    pub fn worker(&self, config: &AppConfig, clock: Arc<dyn Clock>, redis: Option<Arc<RedisManager>>) -> Worker {
        Worker::new(
            self.aggregator.clone(),
            self.evaluator.clone(),
            self.stores.clone(),
            clock,
            redis,
            config.worker_config(),
        )
    }
}

/// Postgres when a URL is configured, otherwise in-memory.
pub async fn open_stores(config: &AppConfig) -> Result<Stores> {
    match &config.database.url {
        Some(url) => {
            let pg = PostgresManager::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            pg.init_tables().await.context("Failed to initialize database tables")?;
            Ok(Stores::from_backend(Arc::new(pg)))
        }
        None => {
            warn!("No database.url configured, using in-memory stores");
            Ok(Stores::in_memory())
        }
    }
}

pub async fn open_redis(config: &AppConfig) -> Result<Option<Arc<RedisManager>>> {
    match &config.redis.url {
        Some(url) => {
            let redis = RedisManager::new(url, &config.redis.key_prefix)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Some(Arc::new(redis)))
        }
        None => Ok(None),
    }
}

/// One aggregation pass behind the same guard and shared lock the scheduler uses.
/// None when another pass holds the lock or the pass failed.
pub async fn aggregate_once(config: &AppConfig) -> Result<Option<CycleReport>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = open_stores(config).await?;
    let redis = open_redis(config).await?;

    let engine = Engine::build(config, stores, clock.clone())?;
    Ok(engine.worker(config, clock, redis).run_aggregation_once().await)
}

/// Runs the HTTP server, scheduler and dispatcher until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = open_stores(&config).await?;
    let redis = open_redis(&config).await?;

    let mut engine = Engine::build(&config, stores, clock.clone())?;
    let vapid = config.push.vapid_key()?;
    if vapid.is_none() {
        warn!("No push.vapid_private_key_file configured, push requests will be unsigned");
    }
    let transport = WebPushTransport::new(
        Duration::from_secs(config.push.request_timeout_seconds),
        config.push.ttl_seconds,
        vapid,
    )?;
    engine.start_dispatcher(Arc::new(transport));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = engine.worker(&config, clock, redis);
    let worker_handle = tokio::spawn(worker.start(shutdown_rx));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, api::router(engine.app_state()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    let _ = shutdown_tx.send(true);
    match worker_handle.await {
        Ok(result) => result?,
        Err(e) => warn!("Scheduler task ended abnormally: {}", e),
    }

    info!("Price alert engine stopped");
    Ok(())
}
