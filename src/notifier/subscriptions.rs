use crate::database::models::{NewPushSubscription, PushSubscription};
use crate::database::SubscriptionStore;
use crate::error::{AppError, Result};
use crate::utils::clock::Clock;
use std::sync::Arc;
use tracing::info;

/// Registration side of push delivery.
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Re-subscribing the same endpoint refreshes its keys and retention window.
    pub async fn subscribe(&self, input: NewPushSubscription) -> Result<PushSubscription> {
        input.validate()?;
        let now = self.clock.now_ms();

        let stored = self
            .store
            .upsert_subscription(PushSubscription {
                endpoint: input.endpoint.trim().to_string(),
                keys: input.keys,
                user_agent: input.user_agent,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!("Registered push subscription {}", stored.endpoint);
        Ok(stored)
    }

    pub async fn unsubscribe(&self, endpoint: &str) -> Result<()> {
        if self.store.delete_subscription(endpoint.trim()).await? {
            info!("Removed push subscription {}", endpoint);
            Ok(())
        } else {
            Err(AppError::not_found(format!("subscription '{}'", endpoint)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::PushKeys;
    use crate::utils::clock::ManualClock;

    fn input(endpoint: &str, auth: &str) -> NewPushSubscription {
        NewPushSubscription {
            endpoint: endpoint.to_string(),
            keys: PushKeys {
                p256dh: "key".into(),
                auth: auth.to_string(),
            },
            user_agent: Some("test".into()),
        }
    }

    #[tokio::test]
    async fn resubscribe_refreshes_but_keeps_created_at() {
        let clock = Arc::new(ManualClock::new(1_000));
        let service = SubscriptionService::new(Arc::new(MemoryStore::new()), clock.clone());

        service.subscribe(input("https://push/x", "a1")).await.unwrap();
        clock.advance(5_000);
        let again = service.subscribe(input("https://push/x", "a2")).await.unwrap();

        assert_eq!(again.created_at, 1_000);
        assert_eq!(again.updated_at, 6_000);
        assert_eq!(again.keys.auth, "a2");
    }

    #[tokio::test]
    async fn unknown_endpoint_unsubscribe_is_not_found() {
        let service = SubscriptionService::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));
        let err = service.unsubscribe("https://nowhere").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_keys_are_rejected() {
        let service = SubscriptionService::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));
        let err = service.subscribe(input("https://push/x", "")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
