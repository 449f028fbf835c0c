// src/error.rs
use thiserror::Error;

/// Errors surfaced by the engine's library layer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range input. Nothing was persisted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown rule or subscription.
    #[error("not found: {0}")]
    NotFound(String),

    /// A persistence failure on a single unit of work.
    #[error("store error: {0}")]
    Store(String),

    /// A single subscriber could not be reached.
    #[error("delivery error ({status:?}): {message}")]
    Delivery {
        status: Option<u16>,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Push services answer 404/410 for subscriptions that will never work again.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Delivery { status: Some(404 | 410), .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_statuses_are_permanent() {
        let gone = AppError::Delivery { status: Some(410), message: "expired".into() };
        let missing = AppError::Delivery { status: Some(404), message: "unknown".into() };
        let flaky = AppError::Delivery { status: Some(503), message: "busy".into() };
        let offline = AppError::Delivery { status: None, message: "timeout".into() };

        assert!(gone.is_gone());
        assert!(missing.is_gone());
        assert!(!flaky.is_gone());
        assert!(!offline.is_gone());
        assert!(!AppError::validation("x").is_gone());
    }
}
