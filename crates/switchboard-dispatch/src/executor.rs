use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use switchboard_core::{ChannelContext, Result, SessionId};

use crate::event::DispatchEvent;

/// Decides whether a gated executor action may proceed.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request(&self, tool_name: &str, args: serde_json::Value) -> bool;
}

/// One turn handed to the executor.
#[derive(Clone)]
pub struct DispatchRequest {
    pub text: String,
    /// Session to resume; `None` starts a new one.
    pub session_id: Option<SessionId>,
    pub context: Option<ChannelContext>,
    /// Who answers `approval_required` events. Without one, gated actions are denied.
    pub approver: Option<Arc<dyn Approver>>,
}

impl DispatchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            context: None,
            approver: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_context(mut self, context: ChannelContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }
}

impl std::fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("text", &self.text)
            .field("session_id", &self.session_id)
            .field("context", &self.context)
            .field("approver", &self.approver.is_some())
            .finish()
    }
}

/// The opaque task-execution engine.
///
/// Implementations push events into `events` in the order they happen and
/// return once the stream is finished. Dropping the sender ends the stream.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: &DispatchRequest,
        events: mpsc::Sender<DispatchEvent>,
    ) -> Result<()>;

    /// Report the decision for a pending `approval_required` event.
    async fn resolve_approval(&self, _id: &str, _approved: bool) -> Result<()> {
        Ok(())
    }
}
