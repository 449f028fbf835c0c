use crate::alerts::RuleLocks;
use crate::database::models::{AlertRule, AlertRuleUpdate, NewAlertRule};
use crate::database::RuleStore;
use crate::error::{AppError, Result};
use crate::utils::clock::Clock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Create/read/update/delete for alert rules.
pub struct AlertManager {
    rules: Arc<dyn RuleStore>,
    locks: Arc<RuleLocks>,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    pub fn new(rules: Arc<dyn RuleStore>, locks: Arc<RuleLocks>, clock: Arc<dyn Clock>) -> Self {
        Self { rules, locks, clock }
    }

    pub async fn create(&self, input: NewAlertRule) -> Result<AlertRule> {
        let now = self.clock.now_ms();
        let rule = AlertRule {
            id: Uuid::new_v4().to_string(),
            symbol: input.symbol.trim().to_string(),
            condition: input.condition,
            target_price: input.target_price,
            frequency: input.frequency,
            cooldown_seconds: input.cooldown_seconds,
            active: true,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;

        self.rules.insert_rule(&rule).await?;
        info!("Created alert {} ({} {} {})", rule.id, rule.symbol, rule.condition, rule.target_price);
        Ok(rule)
    }

    pub async fn get(&self, id: &str) -> Result<AlertRule> {
        self.rules
            .get_rule(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("alert '{}'", id)))
    }

    pub async fn list(&self, symbol: Option<&str>) -> Result<Vec<AlertRule>> {
        self.rules.list_rules(symbol).await
    }

    /// Applies a partial update. Explicitly setting `active` clears any pending reactivation.
    pub async fn update(&self, id: &str, update: AlertRuleUpdate) -> Result<AlertRule> {
        let _guard = self.locks.lock(id).await;

        let mut rule = self.get(id).await?;
        update.apply_to(&mut rule);
        rule.symbol = rule.symbol.trim().to_string();
        rule.validate()?;
        rule.updated_at = self.clock.now_ms();

        if !self.rules.update_rule(&rule).await? {
            return Err(AppError::not_found(format!("alert '{}'", id)));
        }
        if update.active.is_some() {
            self.rules.delete_reactivation(id).await?;
        }

        info!("Updated alert {}", id);
        Ok(rule)
    }

    /// Removes the rule and its pending reactivation. Returns the removed record.
    pub async fn delete(&self, id: &str) -> Result<AlertRule> {
        let removed = {
            let _guard = self.locks.lock(id).await;
            let rule = self.get(id).await?;
            if !self.rules.delete_rule(id).await? {
                return Err(AppError::not_found(format!("alert '{}'", id)));
            }
            rule
        };
        self.locks.forget(id);

        info!("Deleted alert {}", id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::{AlertCondition, AlertFrequency, PendingReactivation};
    use crate::utils::clock::ManualClock;

    fn manager() -> (AlertManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        (
            AlertManager::new(store.clone(), Arc::new(RuleLocks::new()), clock.clone()),
            store,
            clock,
        )
    }

    fn new_rule(frequency: AlertFrequency, cooldown_seconds: Option<i64>) -> NewAlertRule {
        NewAlertRule {
            symbol: " XAU ".into(),
            condition: AlertCondition::Above,
            target_price: 1900.0,
            frequency,
            cooldown_seconds,
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_activates() {
        let (manager, _, _) = manager();
        let rule = manager.create(new_rule(AlertFrequency::Once, None)).await.unwrap();

        assert!(!rule.id.is_empty());
        assert!(rule.active);
        assert_eq!(rule.symbol, "XAU");
        assert_eq!(rule.created_at, 10_000);
        assert_eq!(manager.list(Some("XAU")).await.unwrap().len(), 1);
        assert!(manager.list(Some("XAG")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldown_without_duration_is_rejected() {
        let (manager, _, _) = manager();
        let err = manager.create(new_rule(AlertFrequency::Cooldown, None)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(manager.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_fields_and_bumps_timestamp() {
        let (manager, _, clock) = manager();
        let rule = manager.create(new_rule(AlertFrequency::Every, None)).await.unwrap();
        clock.advance(500);

        let updated = manager
            .update(
                &rule.id,
                AlertRuleUpdate {
                    target_price: Some(1950.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.target_price, 1950.0);
        assert_eq!(updated.condition, AlertCondition::Above);
        assert_eq!(updated.updated_at, 10_500);
    }

    #[tokio::test]
    async fn manual_activation_clears_pending_reactivation() {
        let (manager, store, _) = manager();
        let rule = manager.create(new_rule(AlertFrequency::Cooldown, Some(60))).await.unwrap();
        store
            .schedule_reactivation(&PendingReactivation {
                rule_id: rule.id.clone(),
                reactivate_at: 70_000,
            })
            .await
            .unwrap();

        manager
            .update(
                &rule.id,
                AlertRuleUpdate {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(store.due_reactivations(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (manager, _, _) = manager();
        assert!(matches!(manager.delete("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            manager.update("nope", AlertRuleUpdate::default()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_returns_the_removed_rule() {
        let (manager, _, _) = manager();
        let rule = manager.create(new_rule(AlertFrequency::Once, None)).await.unwrap();
        let removed = manager.delete(&rule.id).await.unwrap();
        assert_eq!(removed.id, rule.id);
        assert!(manager.list(None).await.unwrap().is_empty());
    }
}
