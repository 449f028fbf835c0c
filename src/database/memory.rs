// src/database/memory.rs
//
// Process-local backend. Used when no database URL is configured and by tests;
// "durable" here means it outlives the components built on top of it.

use crate::database::models::{
    AlertRule, Candle, NewTick, PendingReactivation, PushSubscription, Tick,
};
use crate::database::{CandleStore, RuleStore, SubscriptionStore, TickStore};
use crate::error::Result;
use crate::processor::timeframe::Timeframe;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Default)]
struct Inner {
    next_seq: i64,
    ticks: Vec<Tick>,
    candles: BTreeMap<(String, Timeframe, i64), Candle>,
    rules: HashMap<String, AlertRule>,
    reactivations: HashMap<String, PendingReactivation>,
    subscriptions: HashMap<String, PushSubscription>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_rules(mut rules: Vec<AlertRule>) -> Vec<AlertRule> {
    rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    rules
}

#[async_trait]
impl TickStore for MemoryStore {
    async fn append_tick(&self, tick: NewTick) -> Result<Tick> {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let stored = Tick {
            seq: inner.next_seq,
            symbol: tick.symbol,
            price: tick.price,
            timestamp: tick.timestamp,
            received_at: tick.received_at,
        };
        inner.ticks.push(stored.clone());
        Ok(stored)
    }

    async fn distinct_symbols(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let symbols: BTreeSet<&String> = inner.ticks.iter().map(|t| &t.symbol).collect();
        Ok(symbols.into_iter().cloned().collect())
    }

    async fn ticks_between(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        let inner = self.inner.read();
        let mut ticks: Vec<Tick> = inner
            .ticks
            .iter()
            .filter(|t| t.symbol == symbol && t.timestamp >= start_ms && t.timestamp < end_ms)
            .cloned()
            .collect();
        ticks.sort_by_key(|t| (t.timestamp, t.seq));
        Ok(ticks)
    }

    async fn latest_tick(&self, symbol: &str) -> Result<Option<Tick>> {
        let inner = self.inner.read();
        Ok(inner
            .ticks
            .iter()
            .filter(|t| t.symbol == symbol)
            .max_by_key(|t| (t.timestamp, t.seq))
            .cloned())
    }

    async fn purge_ticks_before(&self, cutoff_ms: i64) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.ticks.len();
        inner.ticks.retain(|t| t.received_at >= cutoff_ms);
        Ok((before - inner.ticks.len()) as u64)
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let inner = self.inner.read();
        let lo = (symbol.to_string(), timeframe, i64::MIN);
        let hi = (symbol.to_string(), timeframe, i64::MAX);
        Ok(inner.candles.range(lo..=hi).next_back().map(|(_, c)| c.clone()))
    }

    async fn upsert_candle(&self, candle: &Candle) -> Result<()> {
        self.inner.write().candles.insert(candle.key(), candle.clone());
        Ok(())
    }

    async fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let inner = self.inner.read();
        let lo = (symbol.to_string(), timeframe, i64::MIN);
        let hi = (symbol.to_string(), timeframe, i64::MAX);
        Ok(inner
            .candles
            .range(lo..=hi)
            .rev()
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        self.inner.write().rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        Ok(self.inner.read().rules.get(id).cloned())
    }

    async fn list_rules(&self, symbol: Option<&str>) -> Result<Vec<AlertRule>> {
        let inner = self.inner.read();
        let rules = inner
            .rules
            .values()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .cloned()
            .collect();
        Ok(sorted_rules(rules))
    }

    async fn active_rules_for_symbol(&self, symbol: &str) -> Result<Vec<AlertRule>> {
        let inner = self.inner.read();
        let rules = inner
            .rules
            .values()
            .filter(|r| r.active && r.symbol == symbol)
            .cloned()
            .collect();
        Ok(sorted_rules(rules))
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.rules.get_mut(&rule.id) {
            Some(slot) => {
                *slot = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_rule(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.reactivations.remove(id);
        Ok(inner.rules.remove(id).is_some())
    }

    async fn schedule_reactivation(&self, pending: &PendingReactivation) -> Result<()> {
        self.inner
            .write()
            .reactivations
            .insert(pending.rule_id.clone(), pending.clone());
        Ok(())
    }

    async fn due_reactivations(&self, now_ms: i64) -> Result<Vec<PendingReactivation>> {
        let inner = self.inner.read();
        let mut due: Vec<PendingReactivation> = inner
            .reactivations
            .values()
            .filter(|p| p.reactivate_at <= now_ms)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.reactivate_at.cmp(&b.reactivate_at).then_with(|| a.rule_id.cmp(&b.rule_id)));
        Ok(due)
    }

    async fn delete_reactivation(&self, rule_id: &str) -> Result<()> {
        self.inner.write().reactivations.remove(rule_id);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert_subscription(&self, mut subscription: PushSubscription) -> Result<PushSubscription> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.subscriptions.get(&subscription.endpoint) {
            subscription.created_at = existing.created_at;
        }
        inner
            .subscriptions
            .insert(subscription.endpoint.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn list_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        let inner = self.inner.read();
        let mut subs: Vec<PushSubscription> = inner.subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(subs)
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool> {
        Ok(self.inner.write().subscriptions.remove(endpoint).is_some())
    }

    async fn purge_subscriptions_before(&self, cutoff_ms: i64) -> Result<u64> {
        let mut inner = self.inner.write();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|_, s| s.updated_at >= cutoff_ms);
        Ok((before - inner.subscriptions.len()) as u64)
    }
}
