use crate::alerts::RuleLocks;
use crate::database::models::{AlertCondition, AlertFrequency, AlertRule, PendingReactivation, Tick};
use crate::database::RuleStore;
use crate::error::Result;
use crate::notifier::{NotificationQueue, NotificationRequest};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Distance under which a price counts as sitting on the target.
pub const CROSS_EPSILON: f64 = 0.0001;

#[derive(Debug, Default)]
struct SymbolState {
    last_timestamp: Option<i64>,
    last_price: Option<f64>,
}

/// Side of `target` that `price` is on: -1, 0 (within epsilon) or 1.
fn side(price: f64, target: f64) -> i8 {
    let diff = price - target;
    if diff.abs() < CROSS_EPSILON {
        0
    } else if diff > 0.0 {
        1
    } else {
        -1
    }
}

/// Whether `price` satisfies the rule's condition. `previous` is the last price
/// evaluated for the symbol; CROSSES needs it to see a side change.
pub fn condition_met(condition: AlertCondition, target: f64, price: f64, previous: Option<f64>) -> bool {
    match condition {
        AlertCondition::Above => price > target,
        AlertCondition::Below => price < target,
        AlertCondition::Crosses => {
            let now = side(price, target);
            match previous {
                Some(prev) => {
                    let before = side(prev, target);
                    before != 0 && (now == 0 || now != before)
                }
                None => now == 0,
            }
        }
    }
}

pub struct AlertEvaluator {
    rules: Arc<dyn RuleStore>,
    notifications: NotificationQueue,
    locks: Arc<RuleLocks>,
    symbols: DashMap<String, Arc<Mutex<SymbolState>>>,
}

impl AlertEvaluator {
    pub fn new(rules: Arc<dyn RuleStore>, notifications: NotificationQueue, locks: Arc<RuleLocks>) -> Self {
        Self {
            rules,
            notifications,
            locks,
            symbols: DashMap::new(),
        }
    }

    fn symbol_state(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolState::default())))
            .clone()
    }

    /// Evaluates every active rule of the tick's symbol. Ticks of one symbol are
    /// evaluated one at a time; a tick older than the last evaluated one is skipped.
    /// Returns the notifications that were fired.
    #[instrument(skip(self, tick), fields(symbol = %tick.symbol, price = tick.price))]
    pub async fn evaluate_tick(&self, tick: &Tick, now_ms: i64) -> Result<Vec<NotificationRequest>> {
        let state = self.symbol_state(&tick.symbol);
        let mut state = state.lock().await;

        if let Some(last) = state.last_timestamp {
            if tick.timestamp < last {
                debug!("Tick at {} is older than last evaluated {}, not evaluating", tick.timestamp, last);
                return Ok(Vec::new());
            }
        }

        let candidates = self.rules.active_rules_for_symbol(&tick.symbol).await?;
        let previous = state.last_price;
        let mut fired = Vec::new();

        for candidate in candidates {
            match self.fire_if_met(&candidate.id, &tick.symbol, tick.price, previous, now_ms).await {
                Ok(Some(request)) => fired.push(request),
                Ok(None) => {}
                Err(e) => error!("Failed to evaluate alert {}: {}", candidate.id, e),
            }
        }

        state.last_timestamp = Some(tick.timestamp);
        state.last_price = Some(tick.price);

        Ok(fired)
    }

    /// Check-and-mutate under the rule's lock, against a fresh read of the record.
    /// A rule moved to another symbol since it was listed is left alone.
    async fn fire_if_met(
        &self,
        rule_id: &str,
        symbol: &str,
        price: f64,
        previous: Option<f64>,
        now_ms: i64,
    ) -> Result<Option<NotificationRequest>> {
        let _guard = self.locks.lock(rule_id).await;

        let mut rule = match self.rules.get_rule(rule_id).await? {
            Some(rule) if rule.active && rule.symbol == symbol => rule,
            _ => return Ok(None),
        };

        if !condition_met(rule.condition, rule.target_price, price, previous) {
            return Ok(None);
        }

        rule.last_triggered_at = Some(now_ms);
        rule.updated_at = now_ms;

        match rule.frequency {
            AlertFrequency::Once => rule.active = false,
            AlertFrequency::Every => {}
            AlertFrequency::Cooldown => {
                rule.active = false;
                let cooldown_ms = rule.cooldown_seconds.unwrap_or(0).saturating_mul(1000);
                // Scheduled before the rule is suspended so a failure can't strand it inactive.
                self.rules
                    .schedule_reactivation(&PendingReactivation {
                        rule_id: rule.id.clone(),
                        reactivate_at: now_ms.saturating_add(cooldown_ms),
                    })
                    .await?;
            }
        }

        if !self.rules.update_rule(&rule).await? {
            return Ok(None);
        }

        let request = notification_for(&rule, price, now_ms);
        info!("Alert {} fired: {}", rule.id, request.message());
        self.notifications.enqueue(request.clone());

        Ok(Some(request))
    }

    /// Reactivates cooldown rules whose reactivation time has passed.
    /// Returns how many rules went back to active.
    #[instrument(skip(self))]
    pub async fn process_due_reactivations(&self, now_ms: i64) -> Result<usize> {
        let due = self.rules.due_reactivations(now_ms).await?;
        let mut reactivated = 0;

        for pending in due {
            match self.reactivate(&pending, now_ms).await {
                Ok(true) => reactivated += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to reactivate alert {}: {}", pending.rule_id, e),
            }
        }

        if reactivated > 0 {
            info!("Reactivated {} cooldown alerts", reactivated);
        }
        Ok(reactivated)
    }

    async fn reactivate(&self, pending: &PendingReactivation, now_ms: i64) -> Result<bool> {
        let _guard = self.locks.lock(&pending.rule_id).await;

        let changed = match self.rules.get_rule(&pending.rule_id).await? {
            Some(mut rule) if !rule.active && rule.frequency == AlertFrequency::Cooldown => {
                rule.active = true;
                rule.updated_at = now_ms;
                self.rules.update_rule(&rule).await?
            }
            _ => false,
        };

        self.rules.delete_reactivation(&pending.rule_id).await?;
        Ok(changed)
    }
}

fn notification_for(rule: &AlertRule, price: f64, fired_at: i64) -> NotificationRequest {
    NotificationRequest {
        rule_id: rule.id.clone(),
        symbol: rule.symbol.clone(),
        condition: rule.condition,
        target_price: rule.target_price,
        price,
        fired_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::manager::AlertManager;
    use crate::database::memory::MemoryStore;
    use crate::database::models::AlertRuleUpdate;
    use crate::utils::clock::ManualClock;
    use async_trait::async_trait;

    const T0: i64 = 1_700_000_000_000;

    fn rule(id: &str, condition: AlertCondition, target: f64, frequency: AlertFrequency) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            symbol: "XAU".into(),
            condition,
            target_price: target,
            frequency,
            cooldown_seconds: None,
            active: true,
            last_triggered_at: None,
            created_at: T0,
            updated_at: T0,
        }
    }

    fn tick(price: f64, timestamp: i64) -> Tick {
        Tick {
            seq: 0,
            symbol: "XAU".into(),
            price,
            timestamp,
            received_at: timestamp,
        }
    }

    fn evaluator(store: Arc<MemoryStore>) -> (AlertEvaluator, tokio::sync::mpsc::Receiver<NotificationRequest>) {
        let (queue, rx) = NotificationQueue::new(64);
        (AlertEvaluator::new(store, queue, Arc::new(RuleLocks::new())), rx)
    }

    #[test]
    fn crossing_needs_a_side_change_or_a_touch() {
        assert!(condition_met(AlertCondition::Crosses, 1900.0, 1901.0, Some(1899.0)));
        assert!(condition_met(AlertCondition::Crosses, 1900.0, 1899.0, Some(1901.0)));
        assert!(!condition_met(AlertCondition::Crosses, 1900.0, 1902.0, Some(1901.0)));
        assert!(condition_met(AlertCondition::Crosses, 1900.0, 1900.00005, Some(1899.0)));
        assert!(!condition_met(AlertCondition::Crosses, 1900.0, 1900.0, Some(1900.00001)));
        assert!(condition_met(AlertCondition::Crosses, 1900.0, 1900.0, None));
        assert!(!condition_met(AlertCondition::Crosses, 1900.0, 1901.0, None));
    }

    #[test]
    fn above_and_below_are_strict() {
        assert!(condition_met(AlertCondition::Above, 1900.0, 1900.01, None));
        assert!(!condition_met(AlertCondition::Above, 1900.0, 1900.0, None));
        assert!(condition_met(AlertCondition::Below, 1900.0, 1899.99, None));
        assert!(!condition_met(AlertCondition::Below, 1900.0, 1900.0, None));
    }

    #[tokio::test]
    async fn once_rule_fires_a_single_time() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("once", AlertCondition::Above, 1900.0, AlertFrequency::Once))
            .await
            .unwrap();
        let (evaluator, mut rx) = evaluator(store.clone());

        let first = evaluator.evaluate_tick(&tick(1901.0, T0), T0).await.unwrap();
        let second = evaluator.evaluate_tick(&tick(1902.0, T0 + 1_000), T0 + 1_000).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        let stored = store.get_rule("once").await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.last_triggered_at, Some(T0));
        assert_eq!(rx.recv().await.unwrap().price, 1901.0);
    }

    #[tokio::test]
    async fn every_rule_fires_on_each_matching_tick() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("every", AlertCondition::Below, 1900.0, AlertFrequency::Every))
            .await
            .unwrap();
        let (evaluator, _rx) = evaluator(store.clone());

        let mut fired = 0;
        for (i, price) in [1899.0, 1901.0, 1898.0, 1897.0].into_iter().enumerate() {
            let ts = T0 + i as i64 * 1_000;
            fired += evaluator.evaluate_tick(&tick(price, ts), ts).await.unwrap().len();
        }

        assert_eq!(fired, 3);
        assert!(store.get_rule("every").await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn cooldown_survives_an_evaluator_restart() {
        let store = Arc::new(MemoryStore::new());
        let mut cooling = rule("cool", AlertCondition::Above, 1900.0, AlertFrequency::Cooldown);
        cooling.cooldown_seconds = Some(60);
        store.insert_rule(&cooling).await.unwrap();

        let (first, _rx) = evaluator(store.clone());
        assert_eq!(first.evaluate_tick(&tick(1901.0, T0), T0).await.unwrap().len(), 1);
        drop(first);

        // A fresh evaluator over the same store plays the role of a restarted process.
        let (second, _rx2) = evaluator(store.clone());
        assert!(second
            .evaluate_tick(&tick(1905.0, T0 + 30_000), T0 + 30_000)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(second.process_due_reactivations(T0 + 59_999).await.unwrap(), 0);
        assert_eq!(second.process_due_reactivations(T0 + 60_000).await.unwrap(), 1);
        assert!(store.due_reactivations(i64::MAX).await.unwrap().is_empty());

        let fired = second
            .evaluate_tick(&tick(1906.0, T0 + 61_000), T0 + 61_000)
            .await
            .unwrap();
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test]
    async fn reactivation_of_deleted_rule_just_clears_the_record() {
        let store = Arc::new(MemoryStore::new());
        store
            .schedule_reactivation(&PendingReactivation {
                rule_id: "ghost".into(),
                reactivate_at: T0,
            })
            .await
            .unwrap();
        let (evaluator, _rx) = evaluator(store.clone());

        assert_eq!(evaluator.process_due_reactivations(T0).await.unwrap(), 0);
        assert!(store.due_reactivations(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crosses_rule_uses_previous_tick() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("x", AlertCondition::Crosses, 1900.0, AlertFrequency::Every))
            .await
            .unwrap();
        let (evaluator, _rx) = evaluator(store);

        let prices = [1895.0, 1898.0, 1903.0, 1904.0, 1899.0];
        let mut fired = Vec::new();
        for (i, price) in prices.into_iter().enumerate() {
            let ts = T0 + i as i64 * 1_000;
            fired.push(evaluator.evaluate_tick(&tick(price, ts), ts).await.unwrap().len());
        }

        assert_eq!(fired, vec![0, 0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn stale_tick_is_not_evaluated() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("every", AlertCondition::Above, 1900.0, AlertFrequency::Every))
            .await
            .unwrap();
        let (evaluator, _rx) = evaluator(store);

        assert_eq!(evaluator.evaluate_tick(&tick(1901.0, T0 + 5_000), T0).await.unwrap().len(), 1);
        assert!(evaluator.evaluate_tick(&tick(1950.0, T0), T0).await.unwrap().is_empty());
    }

    /// Moves the listed rule to another symbol right after listing it, the way a
    /// concurrent PUT landing before the rule lock is taken would.
    struct MovesRuleAfterListing {
        inner: Arc<MemoryStore>,
        to_symbol: &'static str,
    }

    #[async_trait]
    impl RuleStore for MovesRuleAfterListing {
        async fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
            self.inner.insert_rule(rule).await
        }

        async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
            self.inner.get_rule(id).await
        }

        async fn list_rules(&self, symbol: Option<&str>) -> Result<Vec<AlertRule>> {
            self.inner.list_rules(symbol).await
        }

        async fn active_rules_for_symbol(&self, symbol: &str) -> Result<Vec<AlertRule>> {
            let listed = self.inner.active_rules_for_symbol(symbol).await?;
            for rule in &listed {
                let mut moved = rule.clone();
                moved.symbol = self.to_symbol.to_string();
                moved.target_price = 20.0;
                self.inner.update_rule(&moved).await?;
            }
            Ok(listed)
        }

        async fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
            self.inner.update_rule(rule).await
        }

        async fn delete_rule(&self, id: &str) -> Result<bool> {
            self.inner.delete_rule(id).await
        }

        async fn schedule_reactivation(&self, pending: &PendingReactivation) -> Result<()> {
            self.inner.schedule_reactivation(pending).await
        }

        async fn due_reactivations(&self, now_ms: i64) -> Result<Vec<PendingReactivation>> {
            self.inner.due_reactivations(now_ms).await
        }

        async fn delete_reactivation(&self, rule_id: &str) -> Result<()> {
            self.inner.delete_reactivation(rule_id).await
        }
    }

    #[tokio::test]
    async fn rule_moved_to_another_symbol_is_not_fired_on_this_tick() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("moved", AlertCondition::Above, 5000.0, AlertFrequency::Once))
            .await
            .unwrap();
        let rules = Arc::new(MovesRuleAfterListing {
            inner: store.clone(),
            to_symbol: "XAG",
        });
        let (queue, mut rx) = NotificationQueue::new(8);
        let evaluator = AlertEvaluator::new(rules, queue, Arc::new(RuleLocks::new()));

        let fired = evaluator.evaluate_tick(&tick(1900.0, T0), T0).await.unwrap();

        assert!(fired.is_empty());
        assert!(rx.try_recv().is_err());
        let stored = store.get_rule("moved").await.unwrap().unwrap();
        assert_eq!(stored.symbol, "XAG");
        assert!(stored.active);
        assert_eq!(stored.last_triggered_at, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn edits_racing_evaluation_never_revive_a_fired_once_rule() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_rule(&rule("once", AlertCondition::Above, 1800.0, AlertFrequency::Once))
            .await
            .unwrap();
        let locks = Arc::new(RuleLocks::new());
        let (queue, _rx) = NotificationQueue::new(256);
        let evaluator = Arc::new(AlertEvaluator::new(store.clone(), queue, locks.clone()));
        let manager = Arc::new(AlertManager::new(store.clone(), locks, Arc::new(ManualClock::new(T0))));

        // Every edit keeps the condition satisfied, so a lost `active = false`
        // would show up as a second firing.
        let editor = tokio::spawn(async move {
            for i in 0..200 {
                let update = AlertRuleUpdate {
                    target_price: Some(1800.0 + i as f64 * 0.1),
                    ..Default::default()
                };
                manager.update("once", update).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let ticker = tokio::spawn(async move {
            let mut fired = 0;
            for i in 0..200 {
                let ts = T0 + i;
                fired += evaluator.evaluate_tick(&tick(1910.0, ts), ts).await.unwrap().len();
                tokio::task::yield_now().await;
            }
            fired
        });

        editor.await.unwrap();
        assert_eq!(ticker.await.unwrap(), 1);
        assert!(!store.get_rule("once").await.unwrap().unwrap().active);
    }
}
