// src/database/mod.rs
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

use crate::database::models::{
    AlertRule, Candle, NewTick, PendingReactivation, PushSubscription, Tick,
};
use crate::error::Result;
use crate::processor::timeframe::Timeframe;
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only tick log with bounded retention.
#[async_trait]
pub trait TickStore: Send + Sync {
    async fn append_tick(&self, tick: NewTick) -> Result<Tick>;

    async fn distinct_symbols(&self) -> Result<Vec<String>>;

    /// Ticks with `start_ms <= timestamp < end_ms`, ascending by timestamp then insertion order.
    async fn ticks_between(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>>;

    async fn latest_tick(&self, symbol: &str) -> Result<Option<Tick>>;

    /// Drops ticks received before `cutoff_ms`. Returns the number removed.
    async fn purge_ticks_before(&self, cutoff_ms: i64) -> Result<u64>;
}

#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;

    /// Writes the candle, replacing any record with the same (symbol, timeframe, bucket start).
    async fn upsert_candle(&self, candle: &Candle) -> Result<()>;

    /// Newest first, at most `limit`.
    async fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<()>;

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    async fn list_rules(&self, symbol: Option<&str>) -> Result<Vec<AlertRule>>;

    async fn active_rules_for_symbol(&self, symbol: &str) -> Result<Vec<AlertRule>>;

    /// Returns false when no rule with that id exists.
    async fn update_rule(&self, rule: &AlertRule) -> Result<bool>;

    /// Removes the rule and any pending reactivation for it.
    async fn delete_rule(&self, id: &str) -> Result<bool>;

    /// Stores the record, replacing an earlier one for the same rule.
    async fn schedule_reactivation(&self, pending: &PendingReactivation) -> Result<()>;

    async fn due_reactivations(&self, now_ms: i64) -> Result<Vec<PendingReactivation>>;

    async fn delete_reactivation(&self, rule_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts or refreshes by endpoint, keeping the first `created_at`.
    async fn upsert_subscription(&self, subscription: PushSubscription) -> Result<PushSubscription>;

    async fn list_subscriptions(&self) -> Result<Vec<PushSubscription>>;

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool>;

    async fn purge_subscriptions_before(&self, cutoff_ms: i64) -> Result<u64>;
}

/// The repositories every component is constructed from.
#[derive(Clone)]
pub struct Stores {
    pub ticks: Arc<dyn TickStore>,
    pub candles: Arc<dyn CandleStore>,
    pub rules: Arc<dyn RuleStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(memory::MemoryStore::new()))
    }

    /// Uses one backend for all four repositories.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: TickStore + CandleStore + RuleStore + SubscriptionStore + 'static,
    {
        Self {
            ticks: backend.clone(),
            candles: backend.clone(),
            rules: backend.clone(),
            subscriptions: backend,
        }
    }
}
