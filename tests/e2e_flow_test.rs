// End-to-end flow tests for the price alert engine
//
// These tests drive the whole pipeline over in-memory stores:
//   tick ingest → alert evaluation → notification queue → dispatcher
//   tick log → candle aggregation → candle queries
//
// Run with: cargo test --test e2e_flow_test

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use price_alert_engine::app::Engine;
use price_alert_engine::config::AppConfig;
use price_alert_engine::database::models::{
    AlertCondition, AlertFrequency, NewAlertRule, NewPushSubscription, PushKeys, PushSubscription,
};
use price_alert_engine::database::{Stores, SubscriptionStore};
use price_alert_engine::error::{AppError, Result};
use price_alert_engine::notifier::broadcast::BroadcastEvent;
use price_alert_engine::notifier::push::PushTransport;
use price_alert_engine::prices::TickInput;
use price_alert_engine::processor::timeframe::Timeframe;
use price_alert_engine::utils::clock::{Clock, ManualClock};

// ============================================================================
// Helpers
// ============================================================================

const T0: i64 = 1_700_000_040_000; // minute aligned

struct RecordingTransport {
    deliveries: Mutex<Vec<(String, serde_json::Value)>>,
    gone: Vec<String>,
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(&self, subscription: &PushSubscription, payload: &serde_json::Value) -> Result<()> {
        if self.gone.contains(&subscription.endpoint) {
            return Err(AppError::Delivery {
                status: Some(410),
                message: "expired".into(),
            });
        }
        self.deliveries
            .lock()
            .push((subscription.endpoint.clone(), payload.clone()));
        Ok(())
    }
}

fn engine(clock: Arc<ManualClock>) -> Engine {
    let mut config = AppConfig::default();
    config.aggregation.concurrency = 2;
    Engine::build(&config, Stores::in_memory(), clock).unwrap()
}

fn tick(price: f64, timestamp: i64) -> TickInput {
    TickInput {
        symbol: "XAU".into(),
        price,
        timestamp,
    }
}

fn subscription(endpoint: &str) -> NewPushSubscription {
    NewPushSubscription {
        endpoint: endpoint.to_string(),
        keys: PushKeys {
            p256dh: "BOr0key".into(),
            auth: "auth".into(),
        },
        user_agent: None,
    }
}

async fn wait_for_deliveries(transport: &RecordingTransport, expected: usize) {
    for _ in 0..100 {
        if transport.deliveries.lock().len() >= expected {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} deliveries, saw {}", expected, transport.deliveries.lock().len());
}

// ============================================================================
// Candle aggregation
// ============================================================================

#[tokio::test]
async fn ticks_roll_up_into_one_minute_candle() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(clock.clone());

    for (price, offset) in [(1900.0, 0), (1905.0, 10_000), (1899.0, 40_000)] {
        clock.set(T0 + offset);
        engine.prices.ingest_tick(tick(price, T0 + offset)).await.unwrap();
    }

    let report = engine.aggregator.run_cycle(T0 + 60_000).await.unwrap();
    assert_eq!(report.failures, 0);
    assert_eq!(report.pairs, Timeframe::ALL.len());

    let candles = engine
        .aggregator
        .recent_candles("XAU", Timeframe::M1, None)
        .await
        .unwrap();
    assert_eq!(candles.len(), 1);
    let c = &candles[0];
    assert_eq!(c.bucket_start, T0);
    assert_eq!(c.open, 1900.0);
    assert_eq!(c.high, 1905.0);
    assert_eq!(c.low, 1899.0);
    assert_eq!(c.close, 1899.0);
    assert_eq!(c.tick_count, 3);

    // Unchanged input, unchanged output
    engine.aggregator.run_cycle(T0 + 60_000).await.unwrap();
    let again = engine
        .aggregator
        .recent_candles("XAU", Timeframe::M1, None)
        .await
        .unwrap();
    assert_eq!(candles, again);
}

// ============================================================================
// Alert lifecycle
// ============================================================================

#[tokio::test]
async fn above_once_fires_and_notifies_subscribers() {
    let clock = Arc::new(ManualClock::new(T0));
    let mut engine = engine(clock.clone());
    let transport = Arc::new(RecordingTransport {
        deliveries: Mutex::new(Vec::new()),
        gone: vec!["https://push.example/expired".into()],
    });
    engine.start_dispatcher(transport.clone()).unwrap();

    engine.subscriptions.subscribe(subscription("https://push.example/a")).await.unwrap();
    engine
        .subscriptions
        .subscribe(subscription("https://push.example/expired"))
        .await
        .unwrap();
    let rule = engine
        .alerts
        .create(NewAlertRule {
            symbol: "XAU".into(),
            condition: AlertCondition::Above,
            target_price: 1900.0,
            frequency: AlertFrequency::Once,
            cooldown_seconds: None,
        })
        .await
        .unwrap();
    let mut live = engine.hub.subscribe();

    engine.prices.ingest_tick(tick(1899.5, T0)).await.unwrap();
    clock.advance(1_000);
    engine.prices.ingest_tick(tick(1901.0, T0 + 1_000)).await.unwrap();
    clock.advance(1_000);
    engine.prices.ingest_tick(tick(1950.0, T0 + 2_000)).await.unwrap();

    wait_for_deliveries(&transport, 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let deliveries = transport.deliveries.lock().clone();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "https://push.example/a");
    assert_eq!(deliveries[0].1["title"], "Gold Price Alert");
    assert_eq!(deliveries[0].1["data"]["alertId"], rule.id.as_str());

    let stored = engine.alerts.get(&rule.id).await.unwrap();
    assert!(!stored.active);
    assert_eq!(stored.last_triggered_at, Some(T0 + 1_000));

    let endpoints: Vec<String> = engine
        .stores
        .subscriptions
        .list_subscriptions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    assert_eq!(endpoints, vec!["https://push.example/a".to_string()]);

    let mut price_updates = 0;
    let mut alerts = 0;
    while let Ok(event) = live.try_recv() {
        match event {
            BroadcastEvent::PriceUpdate { .. } => price_updates += 1,
            BroadcastEvent::AlertTriggered { message, .. } => {
                alerts += 1;
                assert_eq!(message, "XAU price above 1900! Current price: 1901");
            }
        }
    }
    assert_eq!(price_updates, 3);
    assert_eq!(alerts, 1);
}

#[tokio::test]
async fn cooldown_rule_comes_back_after_restart() {
    let clock = Arc::new(ManualClock::new(T0));
    let stores = Stores::in_memory();
    let config = AppConfig::default();

    let first = Engine::build(&config, stores.clone(), clock.clone()).unwrap();
    let rule = first
        .alerts
        .create(NewAlertRule {
            symbol: "XAU".into(),
            condition: AlertCondition::Below,
            target_price: 1800.0,
            frequency: AlertFrequency::Cooldown,
            cooldown_seconds: Some(60),
        })
        .await
        .unwrap();
    first.prices.ingest_tick(tick(1790.0, T0)).await.unwrap();
    assert!(!first.alerts.get(&rule.id).await.unwrap().active);
    drop(first);

    // Same stores, fresh components
    let second = Engine::build(&config, stores, clock.clone()).unwrap();
    clock.set(T0 + 59_000);
    assert_eq!(second.evaluator.process_due_reactivations(clock.now_ms()).await.unwrap(), 0);
    clock.set(T0 + 60_000);
    assert_eq!(second.evaluator.process_due_reactivations(T0 + 60_000).await.unwrap(), 1);
    assert!(second.alerts.get(&rule.id).await.unwrap().active);
}

#[tokio::test]
async fn future_tick_is_rejected_and_nothing_happens() {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(clock);
    engine
        .alerts
        .create(NewAlertRule {
            symbol: "XAU".into(),
            condition: AlertCondition::Above,
            target_price: 1.0,
            frequency: AlertFrequency::Every,
            cooldown_seconds: None,
        })
        .await
        .unwrap();

    let err = engine.prices.ingest_tick(tick(1900.0, T0 + 31_000)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(engine.prices.latest_price("XAU").await.unwrap().is_none());

    let rules = engine.alerts.list(Some("XAU")).await.unwrap();
    assert_eq!(rules[0].last_triggered_at, None);
}
