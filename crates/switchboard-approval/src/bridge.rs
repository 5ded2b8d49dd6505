use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use switchboard_config::{ApprovalConfig, TimeoutDecision};
use switchboard_core::{EventSink, GatewayEvent};
use switchboard_dispatch::Approver;

/// How long to wait for a human, and what silence means.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalPolicy {
    pub timeout: Duration,
    pub on_timeout: TimeoutDecision,
}

impl ApprovalPolicy {
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            on_timeout: config.on_timeout,
        }
    }

    fn default_decision(&self) -> bool {
        self.on_timeout == TimeoutDecision::Approve
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::from_config(&ApprovalConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    /// Nobody answered; carries the policy default that was applied.
    TimedOut(bool),
}

impl ApprovalOutcome {
    pub fn approved(&self) -> bool {
        match self {
            ApprovalOutcome::Approved => true,
            ApprovalOutcome::Denied => false,
            ApprovalOutcome::TimedOut(default) => *default,
        }
    }
}

struct PendingEntry<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<bool>>>,
    id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

/// A client's answer, as it arrives over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalReply {
    pub id: String,
    pub approved: bool,
}

/// Per-connection approval state.
pub struct ApprovalBridge {
    sink: Arc<dyn EventSink>,
    policy: ApprovalPolicy,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBridge {
    pub fn new(sink: Arc<dyn EventSink>, policy: ApprovalPolicy) -> Self {
        Self {
            sink,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    /// Ask the connected client and wait for an answer or the timeout.
    pub async fn request_outcome(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> ApprovalOutcome {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        // Removes the entry however this future ends, dropped mid-wait included.
        let _pending = PendingEntry {
            pending: &self.pending,
            id: &id,
        };

        info!(request_id = %id, tool = tool_name, "requesting human approval");
        self.sink.emit(GatewayEvent::ApprovalRequest {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            args,
            timeout: self.policy.timeout.as_millis() as u64,
        });

        let default = self.policy.default_decision();
        match tokio::time::timeout(self.policy.timeout, rx).await {
            Ok(Ok(true)) => ApprovalOutcome::Approved,
            Ok(Ok(false)) => ApprovalOutcome::Denied,
            // Sender dropped by cancel_all().
            Ok(Err(_)) => ApprovalOutcome::TimedOut(default),
            Err(_) => {
                info!(request_id = %id, default, "approval request timed out");
                ApprovalOutcome::TimedOut(default)
            }
        }
    }

    /// Resolve a pending request. Unknown or already-resolved ids are ignored.
    ///
    /// Returns whether this call was the one that resolved the request.
    pub fn handle_response(&self, reply: &ApprovalReply) -> bool {
        let Some(tx) = self.pending.lock().remove(&reply.id) else {
            debug!(request_id = %reply.id, "approval response for unknown or settled request");
            return false;
        };
        tx.send(reply.approved).is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Settle everything still waiting with the timeout default (connection closed).
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "cancelling pending approvals");
        }
    }
}

#[async_trait]
impl Approver for ApprovalBridge {
    async fn request(&self, tool_name: &str, args: serde_json::Value) -> bool {
        self.request_outcome(tool_name, args).await.approved()
    }
}
