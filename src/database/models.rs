// src/database/models.rs
use crate::error::AppError;
use crate::processor::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stored price observation. `seq` orders ticks that share a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub seq: i64,
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
    pub received_at: i64,
}

/// A tick accepted by validation but not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTick {
    pub symbol: String,
    pub price: f64,
    pub timestamp: i64,
    pub received_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_count: i64,
}

impl Candle {
    pub fn key(&self) -> (String, Timeframe, i64) {
        (self.symbol.clone(), self.timeframe, self.bucket_start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    #[serde(alias = "ABOVE")]
    Above,
    #[serde(alias = "BELOW")]
    Below,
    #[serde(alias = "CROSSES")]
    Crosses,
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::Above => write!(f, "above"),
            AlertCondition::Below => write!(f, "below"),
            AlertCondition::Crosses => write!(f, "crosses"),
        }
    }
}

impl FromStr for AlertCondition {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(AlertCondition::Above),
            "below" => Ok(AlertCondition::Below),
            "crosses" => Ok(AlertCondition::Crosses),
            other => Err(AppError::validation(format!("unknown alert condition '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertFrequency {
    #[serde(alias = "ONCE")]
    Once,
    #[serde(alias = "EVERY")]
    Every,
    #[serde(alias = "COOLDOWN")]
    Cooldown,
}

impl fmt::Display for AlertFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertFrequency::Once => write!(f, "once"),
            AlertFrequency::Every => write!(f, "every"),
            AlertFrequency::Cooldown => write!(f, "cooldown"),
        }
    }
}

impl FromStr for AlertFrequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "once" => Ok(AlertFrequency::Once),
            "every" => Ok(AlertFrequency::Every),
            "cooldown" => Ok(AlertFrequency::Cooldown),
            other => Err(AppError::validation(format!("unknown alert frequency '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub target_price: f64,
    pub frequency: AlertFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<i64>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AlertRule {
    /// Checks the field-level invariants shared by create and update.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.symbol.trim().is_empty() {
            return Err(AppError::validation("symbol must not be empty"));
        }
        if !self.target_price.is_finite() || self.target_price < 0.0 {
            return Err(AppError::validation("targetPrice must be a finite, non-negative number"));
        }
        match (self.frequency, self.cooldown_seconds) {
            (AlertFrequency::Cooldown, Some(secs)) if secs > 0 => Ok(()),
            (AlertFrequency::Cooldown, _) => Err(AppError::validation(
                "cooldownSeconds must be present and greater than zero for cooldown rules",
            )),
            (_, Some(secs)) if secs <= 0 => {
                Err(AppError::validation("cooldownSeconds must be greater than zero"))
            }
            _ => Ok(()),
        }
    }
}

/// Input of the create operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlertRule {
    pub symbol: String,
    pub condition: AlertCondition,
    pub target_price: f64,
    pub frequency: AlertFrequency,
    #[serde(default)]
    pub cooldown_seconds: Option<i64>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRuleUpdate {
    pub symbol: Option<String>,
    pub condition: Option<AlertCondition>,
    pub target_price: Option<f64>,
    pub frequency: Option<AlertFrequency>,
    pub cooldown_seconds: Option<i64>,
    pub active: Option<bool>,
}

impl AlertRuleUpdate {
    pub fn apply_to(&self, rule: &mut AlertRule) {
        if let Some(symbol) = &self.symbol {
            rule.symbol = symbol.clone();
        }
        if let Some(condition) = self.condition {
            rule.condition = condition;
        }
        if let Some(target_price) = self.target_price {
            rule.target_price = target_price;
        }
        if let Some(frequency) = self.frequency {
            rule.frequency = frequency;
        }
        if let Some(cooldown_seconds) = self.cooldown_seconds {
            rule.cooldown_seconds = Some(cooldown_seconds);
        }
        if let Some(active) = self.active {
            rule.active = active;
        }
    }
}

/// Durable record that flips a suspended cooldown rule back to active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingReactivation {
    pub rule_id: String,
    pub reactivate_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of the subscribe operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    #[serde(default, alias = "user_agent")]
    pub user_agent: Option<String>,
}

impl NewPushSubscription {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.endpoint.trim().is_empty() {
            return Err(AppError::validation("endpoint must not be empty"));
        }
        if self.keys.p256dh.is_empty() || self.keys.auth.is_empty() {
            return Err(AppError::validation("keys.p256dh and keys.auth are required"));
        }
        Ok(())
    }
}
