// src/alerts/mod.rs
pub mod evaluator;
pub mod manager;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per rule id. Every read-modify-write of a rule record,
/// whether from evaluation, reactivation or management, holds its entry.
#[derive(Default)]
pub struct RuleLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RuleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, rule_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops the entry for a deleted rule.
    pub fn forget(&self, rule_id: &str) {
        self.locks.remove(rule_id);
    }
}
