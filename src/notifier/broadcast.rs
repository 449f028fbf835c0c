use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Events pushed to every connected real-time client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    PriceUpdate {
        symbol: String,
        price: f64,
        timestamp: i64,
    },
    AlertTriggered {
        message: String,
        data: serde_json::Value,
    },
}

/// Process-wide pub/sub handle. Clone-able; lives as long as its owners.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of receivers reached; 0 when nobody is listening.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
