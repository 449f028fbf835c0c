use crate::api::{ApiError, ApiResult, AppState};
use crate::database::models::{AlertRule, AlertRuleUpdate, Candle, NewAlertRule, NewPushSubscription, PushSubscription, Tick};
use crate::error::AppError;
use crate::prices::TickInput;
use crate::processor::timeframe::Timeframe;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError(AppError::validation(rejection.body_text()))
}

fn bad_query(rejection: QueryRejection) -> ApiError {
    ApiError(AppError::validation(rejection.body_text()))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ingest_tick(
    State(state): State<AppState>,
    body: Result<Json<TickInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Tick>), ApiError> {
    let Json(input) = body.map_err(bad_json)?;
    let tick = state.prices.ingest_tick(input).await?;
    Ok((StatusCode::CREATED, Json(tick)))
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    pub symbol: String,
}

pub async fn latest_price(
    State(state): State<AppState>,
    query: Result<Query<SymbolQuery>, QueryRejection>,
) -> ApiResult<Option<Tick>> {
    let Query(query) = query.map_err(bad_query)?;
    Ok(Json(state.prices.latest_price(&query.symbol).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub symbol: String,
    pub start_time: i64,
    pub end_time: i64,
}

pub async fn price_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<Tick>> {
    let Query(query) = query.map_err(bad_query)?;
    let ticks = state
        .prices
        .price_history(&query.symbol, query.start_time, query.end_time)
        .await?;
    Ok(Json(ticks))
}

#[derive(Debug, Deserialize)]
pub struct CandleQuery {
    pub symbol: String,
    pub timeframe: Option<String>,
    pub limit: Option<usize>,
}

pub async fn candles(
    State(state): State<AppState>,
    query: Result<Query<CandleQuery>, QueryRejection>,
) -> ApiResult<Vec<Candle>> {
    let Query(query) = query.map_err(bad_query)?;
    let timeframe = match query.timeframe.as_deref() {
        Some(name) => name.parse::<Timeframe>()?,
        None => Timeframe::M1,
    };
    let candles = state
        .candles
        .recent_candles(&query.symbol, timeframe, query.limit)
        .await?;
    Ok(Json(candles))
}

pub async fn create_alert(
    State(state): State<AppState>,
    body: Result<Json<NewAlertRule>, JsonRejection>,
) -> Result<(StatusCode, Json<AlertRule>), ApiError> {
    let Json(input) = body.map_err(bad_json)?;
    let rule = state.alerts.create(input).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub symbol: Option<String>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    query: Result<Query<AlertListQuery>, QueryRejection>,
) -> ApiResult<Vec<AlertRule>> {
    let Query(query) = query.map_err(bad_query)?;
    Ok(Json(state.alerts.list(query.symbol.as_deref()).await?))
}

pub async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AlertRuleUpdate>, JsonRejection>,
) -> ApiResult<AlertRule> {
    let Json(update) = body.map_err(bad_json)?;
    Ok(Json(state.alerts.update(&id, update).await?))
}

pub async fn delete_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<AlertRule> {
    Ok(Json(state.alerts.delete(&id).await?))
}

pub async fn subscribe(
    State(state): State<AppState>,
    body: Result<Json<NewPushSubscription>, JsonRejection>,
) -> Result<(StatusCode, Json<PushSubscription>), ApiError> {
    let Json(input) = body.map_err(bad_json)?;
    let subscription = state.subscriptions.subscribe(input).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    body: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = body.map_err(bad_json)?;
    state.subscriptions.unsubscribe(&request.endpoint).await?;
    Ok(Json(json!({ "success": true })))
}
