// src/database/postgres.rs
use crate::database::models::{
    AlertCondition, AlertFrequency, AlertRule, Candle, NewTick, PendingReactivation, PushKeys, PushSubscription, Tick,
};
use crate::database::{schema, CandleStore, RuleStore, SubscriptionStore, TickStore};
use crate::error::{AppError, Result};
use crate::processor::timeframe::Timeframe;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, FromRow};
use tracing::info;

pub struct PostgresManager {
    pool: PgPool,
}

#[derive(FromRow)]
struct CandleRow {
    symbol: String,
    timeframe: String,
    bucket_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_count: i64,
}

impl TryFrom<CandleRow> for Candle {
    type Error = AppError;

    fn try_from(row: CandleRow) -> Result<Self> {
        Ok(Candle {
            symbol: row.symbol,
            timeframe: row.timeframe.parse::<Timeframe>().map_err(|e| AppError::store(e.to_string()))?,
            bucket_start: row.bucket_start,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            tick_count: row.tick_count,
        })
    }
}

#[derive(FromRow)]
struct AlertRuleRow {
    id: String,
    symbol: String,
    condition: String,
    target_price: f64,
    frequency: String,
    cooldown_seconds: Option<i64>,
    active: bool,
    last_triggered_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = AppError;

    fn try_from(row: AlertRuleRow) -> Result<Self> {
        // A bad enum value in the table is a storage problem, not caller input.
        let condition = row.condition.parse::<AlertCondition>().map_err(|e| AppError::store(e.to_string()))?;
        let frequency = row.frequency.parse::<AlertFrequency>().map_err(|e| AppError::store(e.to_string()))?;
        Ok(AlertRule {
            id: row.id,
            symbol: row.symbol,
            condition,
            target_price: row.target_price,
            frequency,
            cooldown_seconds: row.cooldown_seconds,
            active: row.active,
            last_triggered_at: row.last_triggered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PushSubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
    user_agent: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<PushSubscriptionRow> for PushSubscription {
    fn from(row: PushSubscriptionRow) -> Self {
        PushSubscription {
            endpoint: row.endpoint,
            keys: PushKeys {
                p256dh: row.p256dh,
                auth: row.auth,
            },
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const RULE_COLUMNS: &str = "id, symbol, condition, target_price, frequency, cooldown_seconds, active, \
     last_triggered_at, created_at, updated_at";

fn rules_from_rows(rows: Vec<AlertRuleRow>) -> Result<Vec<AlertRule>> {
    rows.into_iter().map(AlertRule::try_from).collect()
}

impl PostgresManager {
    pub async fn new(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        info!("Connected to PostgreSQL (max_connections={})", max_connections);
        Ok(Self { pool })
    }

    // Create tables if they don't exist
    pub async fn init_tables(&self) -> Result<()> {
        for statement in schema::ALL {
            // Unprepared execution so multi-statement blocks are accepted.
            self.pool.execute(statement).await?;
        }

        info!("Database tables initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl TickStore for PostgresManager {
    async fn append_tick(&self, tick: NewTick) -> Result<Tick> {
        let stored = sqlx::query_as::<_, Tick>(
            "INSERT INTO ticks (symbol, price, timestamp, received_at)
            VALUES ($1, $2, $3, $4)
            RETURNING seq, symbol, price, timestamp, received_at",
        )
        .bind(&tick.symbol)
        .bind(tick.price)
        .bind(tick.timestamp)
        .bind(tick.received_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn distinct_symbols(&self) -> Result<Vec<String>> {
        let symbols = sqlx::query_scalar::<_, String>("SELECT DISTINCT symbol FROM ticks ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        Ok(symbols)
    }

    async fn ticks_between(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        let ticks = sqlx::query_as::<_, Tick>(
            "SELECT seq, symbol, price, timestamp, received_at
            FROM ticks
            WHERE symbol = $1 AND timestamp >= $2 AND timestamp < $3
            ORDER BY timestamp ASC, seq ASC",
        )
        .bind(symbol)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(ticks)
    }

    async fn latest_tick(&self, symbol: &str) -> Result<Option<Tick>> {
        let tick = sqlx::query_as::<_, Tick>(
            "SELECT seq, symbol, price, timestamp, received_at
            FROM ticks
            WHERE symbol = $1
            ORDER BY timestamp DESC, seq DESC
            LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tick)
    }

    async fn purge_ticks_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ticks WHERE received_at < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CandleStore for PostgresManager {
    async fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let row = sqlx::query_as::<_, CandleRow>(
            "SELECT symbol, timeframe, bucket_start, open, high, low, close, tick_count
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
            ORDER BY bucket_start DESC
            LIMIT 1",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Candle::try_from).transpose()
    }

    async fn upsert_candle(&self, candle: &Candle) -> Result<()> {
        sqlx::query(
            "INSERT INTO candles
            (symbol, timeframe, bucket_start, open, high, low, close, tick_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol, timeframe, bucket_start)
            DO UPDATE SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
                close = EXCLUDED.close, tick_count = EXCLUDED.tick_count",
        )
        .bind(&candle.symbol)
        .bind(candle.timeframe.as_str())
        .bind(candle.bucket_start)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.tick_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let rows = sqlx::query_as::<_, CandleRow>(
            "SELECT symbol, timeframe, bucket_start, open, high, low, close, tick_count
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
            ORDER BY bucket_start DESC
            LIMIT $3",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Candle::try_from).collect()
    }
}

#[async_trait]
impl RuleStore for PostgresManager {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_rules
            (id, symbol, condition, target_price, frequency, cooldown_seconds, active,
             last_triggered_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&rule.id)
        .bind(&rule.symbol)
        .bind(rule.condition.to_string())
        .bind(rule.target_price)
        .bind(rule.frequency.to_string())
        .bind(rule.cooldown_seconds)
        .bind(rule.active)
        .bind(rule.last_triggered_at)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let row = sqlx::query_as::<_, AlertRuleRow>(&format!(
            "SELECT {} FROM alert_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertRule::try_from).transpose()
    }

    async fn list_rules(&self, symbol: Option<&str>) -> Result<Vec<AlertRule>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query_as::<_, AlertRuleRow>(&format!(
                    "SELECT {} FROM alert_rules WHERE symbol = $1 ORDER BY created_at, id",
                    RULE_COLUMNS
                ))
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AlertRuleRow>(&format!(
                    "SELECT {} FROM alert_rules ORDER BY created_at, id",
                    RULE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rules_from_rows(rows)
    }

    async fn active_rules_for_symbol(&self, symbol: &str) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(&format!(
            "SELECT {} FROM alert_rules WHERE active = TRUE AND symbol = $1 ORDER BY created_at, id",
            RULE_COLUMNS
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rules_from_rows(rows)
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alert_rules SET
                symbol = $2, condition = $3, target_price = $4, frequency = $5,
                cooldown_seconds = $6, active = $7, last_triggered_at = $8, updated_at = $9
            WHERE id = $1",
        )
        .bind(&rule.id)
        .bind(&rule.symbol)
        .bind(rule.condition.to_string())
        .bind(rule.target_price)
        .bind(rule.frequency.to_string())
        .bind(rule.cooldown_seconds)
        .bind(rule.active)
        .bind(rule.last_triggered_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_rule(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_reactivations WHERE rule_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn schedule_reactivation(&self, pending: &PendingReactivation) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_reactivations (rule_id, reactivate_at)
            VALUES ($1, $2)
            ON CONFLICT (rule_id) DO UPDATE SET reactivate_at = EXCLUDED.reactivate_at",
        )
        .bind(&pending.rule_id)
        .bind(pending.reactivate_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_reactivations(&self, now_ms: i64) -> Result<Vec<PendingReactivation>> {
        let due = sqlx::query_as::<_, PendingReactivation>(
            "SELECT rule_id, reactivate_at
            FROM pending_reactivations
            WHERE reactivate_at <= $1
            ORDER BY reactivate_at ASC, rule_id ASC",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }

    async fn delete_reactivation(&self, rule_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_reactivations WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresManager {
    async fn upsert_subscription(&self, subscription: PushSubscription) -> Result<PushSubscription> {
        let row = sqlx::query_as::<_, PushSubscriptionRow>(
            "INSERT INTO push_subscriptions (endpoint, p256dh, auth, user_agent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (endpoint) DO UPDATE SET
                p256dh = EXCLUDED.p256dh, auth = EXCLUDED.auth,
                user_agent = EXCLUDED.user_agent, updated_at = EXCLUDED.updated_at
            RETURNING endpoint, p256dh, auth, user_agent, created_at, updated_at",
        )
        .bind(&subscription.endpoint)
        .bind(&subscription.keys.p256dh)
        .bind(&subscription.keys.auth)
        .bind(&subscription.user_agent)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        let rows = sqlx::query_as::<_, PushSubscriptionRow>(
            "SELECT endpoint, p256dh, auth, user_agent, created_at, updated_at
            FROM push_subscriptions
            ORDER BY endpoint",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PushSubscription::from).collect())
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_subscriptions_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE updated_at < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
