// src/notifier/mod.rs
pub mod broadcast;
pub mod dispatcher;
pub mod push;
pub mod subscriptions;

use crate::database::models::AlertCondition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything a fired rule hands to the delivery side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub rule_id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub target_price: f64,
    pub price: f64,
    pub fired_at: i64,
}

impl NotificationRequest {
    pub fn message(&self) -> String {
        format!(
            "{} price {} {}! Current price: {}",
            self.symbol, self.condition, self.target_price, self.price
        )
    }

    pub fn metadata(&self) -> serde_json::Value {
        json!({
            "alertId": self.rule_id,
            "symbol": self.symbol,
            "condition": self.condition,
            "targetPrice": self.target_price,
            "price": self.price,
            "firedAt": self.fired_at,
        })
    }
}

/// Outcome of one `send_notification` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub broadcast_receivers: usize,
    pub delivered: usize,
    pub failed: usize,
    pub removed: usize,
}

/// Fans a message out to real-time listeners and push subscriptions.
/// Individual delivery failures are absorbed into the report.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_notification(&self, message: &str, metadata: serde_json::Value) -> DispatchReport;
}

/// Bounded hand-off between the evaluator and the dispatch task.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationRequest>,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never waits. A full or closed queue drops the request with a warning.
    pub fn enqueue(&self, request: NotificationRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!("Notification queue full, dropping alert {} for {}", request.rule_id, request.symbol);
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                warn!("Notification queue closed, dropping alert {} for {}", request.rule_id, request.symbol);
                false
            }
        }
    }
}

pub fn spawn_dispatch_loop(
    mut rx: mpsc::Receiver<NotificationRequest>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Started notification dispatcher");

        while let Some(request) = rx.recv().await {
            let report = dispatcher
                .send_notification(&request.message(), request.metadata())
                .await;

            if report.failed > 0 {
                error!(
                    "Alert {} notification: {} delivered, {} failed, {} subscriptions removed",
                    request.rule_id, report.delivered, report.failed, report.removed
                );
            } else {
                debug!("Alert {} notification dispatched: {:?}", request.rule_id, report);
            }
        }

        info!("Notification dispatcher stopped");
    })
}
