// Table definitions applied by `PostgresManager::init_tables`, in order.
// Retention (24h ticks, 30d push subscriptions) is enforced by the scheduler's purge pass.

pub const CREATE_TICKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    seq BIGSERIAL PRIMARY KEY,
    symbol VARCHAR NOT NULL,
    price DOUBLE PRECISION NOT NULL CHECK (price >= 0),
    timestamp BIGINT NOT NULL,
    received_at BIGINT NOT NULL
);
"#;

pub const CREATE_TICKS_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ticks_symbol_timestamp ON ticks(symbol, timestamp, seq);
CREATE INDEX IF NOT EXISTS idx_ticks_received_at ON ticks(received_at);
"#;

pub const CREATE_CANDLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS candles (
    symbol VARCHAR NOT NULL,
    timeframe VARCHAR NOT NULL,
    bucket_start BIGINT NOT NULL,
    open DOUBLE PRECISION NOT NULL,
    high DOUBLE PRECISION NOT NULL,
    low DOUBLE PRECISION NOT NULL,
    close DOUBLE PRECISION NOT NULL,
    tick_count BIGINT NOT NULL CHECK (tick_count >= 1),
    UNIQUE(symbol, timeframe, bucket_start)
);
"#;

pub const CREATE_ALERT_RULES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS alert_rules (
    id VARCHAR PRIMARY KEY,
    symbol VARCHAR NOT NULL,
    condition VARCHAR NOT NULL,
    target_price DOUBLE PRECISION NOT NULL,
    frequency VARCHAR NOT NULL,
    cooldown_seconds BIGINT,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    last_triggered_at BIGINT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
"#;

pub const CREATE_ALERT_RULES_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_alert_rules_symbol ON alert_rules(symbol);
CREATE INDEX IF NOT EXISTS idx_alert_rules_matching ON alert_rules(active, symbol, target_price);
"#;

pub const CREATE_PENDING_REACTIVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pending_reactivations (
    rule_id VARCHAR PRIMARY KEY,
    reactivate_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_reactivations_due ON pending_reactivations(reactivate_at);
"#;

pub const CREATE_PUSH_SUBSCRIPTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS push_subscriptions (
    endpoint VARCHAR PRIMARY KEY,
    p256dh VARCHAR NOT NULL,
    auth VARCHAR NOT NULL,
    user_agent VARCHAR,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_push_subscriptions_updated_at ON push_subscriptions(updated_at);
"#;

pub const ALL: [&str; 7] = [
    CREATE_TICKS_TABLE,
    CREATE_TICKS_INDICES,
    CREATE_CANDLES_TABLE,
    CREATE_ALERT_RULES_TABLE,
    CREATE_ALERT_RULES_INDICES,
    CREATE_PENDING_REACTIVATIONS_TABLE,
    CREATE_PUSH_SUBSCRIPTIONS_TABLE,
];
