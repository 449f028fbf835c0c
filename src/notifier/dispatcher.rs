use crate::database::SubscriptionStore;
use crate::notifier::broadcast::{BroadcastEvent, BroadcastHub};
use crate::notifier::push::{push_payload, PushTransport};
use crate::notifier::{DispatchReport, NotificationDispatcher};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Broadcasts to live clients, then pushes to every stored subscription in parallel.
pub struct PushDispatcher {
    hub: BroadcastHub,
    subscriptions: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn PushTransport>,
}

impl PushDispatcher {
    pub fn new(
        hub: BroadcastHub,
        subscriptions: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            hub,
            subscriptions,
            transport,
        }
    }
}

#[async_trait]
impl NotificationDispatcher for PushDispatcher {
    #[instrument(skip(self, metadata))]
    async fn send_notification(&self, message: &str, metadata: serde_json::Value) -> DispatchReport {
        let mut report = DispatchReport {
            broadcast_receivers: self.hub.publish(BroadcastEvent::AlertTriggered {
                message: message.to_string(),
                data: metadata.clone(),
            }),
            ..Default::default()
        };

        let subscriptions = match self.subscriptions.list_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                error!("Failed to load push subscriptions: {}", e);
                return report;
            }
        };

        if subscriptions.is_empty() {
            return report;
        }

        let payload = push_payload(message, &metadata);
        let deliveries = subscriptions.iter().map(|sub| {
            let payload = &payload;
            async move { (sub, self.transport.deliver(sub, payload).await) }
        });

        for (sub, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_gone() => {
                    report.failed += 1;
                    info!("Removing expired push subscription {}", sub.endpoint);
                    match self.subscriptions.delete_subscription(&sub.endpoint).await {
                        Ok(_) => report.removed += 1,
                        Err(e) => error!("Failed to remove subscription {}: {}", sub.endpoint, e),
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Push to {} failed: {}", sub.endpoint, e);
                }
            }
        }

        report
    }
}
