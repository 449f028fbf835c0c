// src/api/mod.rs
pub mod handlers;
pub mod websocket;

use crate::alerts::manager::AlertManager;
use crate::error::AppError;
use crate::notifier::broadcast::BroadcastHub;
use crate::notifier::subscriptions::SubscriptionService;
use crate::prices::PriceService;
use crate::processor::aggregator::CandleAggregator;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub prices: Arc<PriceService>,
    pub candles: Arc<CandleAggregator>,
    pub alerts: Arc<AlertManager>,
    pub subscriptions: Arc<SubscriptionService>,
    pub hub: BroadcastHub,
}

/// HTTP face of `AppError`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Delivery { .. } => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/prices/tick", post(handlers::ingest_tick))
        .route("/prices/latest", get(handlers::latest_price))
        .route("/prices/history", get(handlers::price_history))
        .route("/candles", get(handlers::candles))
        .route("/alerts", post(handlers::create_alert).get(handlers::list_alerts))
        .route("/alerts/:id", put(handlers::update_alert).delete(handlers::delete_alert))
        .route("/notifications/subscribe", post(handlers::subscribe))
        .route("/notifications/unsubscribe", delete(handlers::unsubscribe))
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
