use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Events fanned out to every connected UI client.
///
/// Serialised with a `type` tag using the front-door naming
/// (`approval:request`, `heartbeat:healing`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    // ── Work lifecycle ─────────────────────────────────────────
    #[serde(rename = "task:created")]
    TaskCreated {
        source: String,
        summary: String,
    },
    #[serde(rename = "session:switched")]
    SessionSwitched {
        channel_key: String,
        session_id: String,
    },
    #[serde(rename = "file:change")]
    FileChange {
        path: String,
        change: String,
    },

    // ── Approval gate ──────────────────────────────────────────
    #[serde(rename = "approval:request")]
    ApprovalRequest {
        id: String,
        tool_name: String,
        args: serde_json::Value,
        /// Milliseconds until the request resolves to its default.
        timeout: u64,
    },

    // ── Worker module supervision ──────────────────────────────
    #[serde(rename = "heartbeat:healing")]
    HealingStarted {
        module: String,
        port: u16,
        error: String,
        backup: String,
    },
    #[serde(rename = "heartbeat:recovered")]
    ModuleRecovered { module: String },
    #[serde(rename = "heartbeat:restored")]
    ModuleRestored { module: String, reason: String },
    #[serde(rename = "heartbeat:heal_failed")]
    HealFailed { module: String, error: String },

    // ── Channels & cron ────────────────────────────────────────
    #[serde(rename = "channel:error")]
    ChannelError {
        channel_id: String,
        chat_id: String,
        error: String,
    },
    #[serde(rename = "cron:result")]
    CronResult {
        job_id: String,
        name: String,
        text: String,
    },

    // ── System ─────────────────────────────────────────────────
    #[serde(rename = "notice")]
    Notice { message: String },
}

/// Anything that can accept gateway events.
///
/// The global [`EventBus`] is one sink; a single client connection's outgoing
/// queue is another.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GatewayEvent);
}

/// A broadcast-based event bus: the "broadcast" sink every component shares.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GatewayEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: GatewayEvent) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: GatewayEvent) {
        self.publish(event);
    }
}

impl EventSink for mpsc::UnboundedSender<GatewayEvent> {
    fn emit(&self, event: GatewayEvent) {
        // The connection is gone; nothing left to deliver to.
        let _ = self.send(event);
    }
}
