use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use switchboard_core::{Result, SessionId, SwitchboardError};

use crate::event::DispatchEvent;
use crate::executor::{DispatchRequest, Executor};

/// What one completed turn produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// The resumed session, or the one announced by `init`.
    pub session_id: Option<SessionId>,
    /// All `text` deltas, concatenated.
    pub text: String,
    /// Payload of the terminal `result` event.
    pub result: serde_json::Value,
}

/// Drives one executor invocation per call.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Run one turn. `on_event` sees every event in executor order.
    ///
    /// Resolves after the stream ends with a `result`; rejects on executor
    /// failure, on an `error` event, or when the stream ends without a result.
    pub async fn dispatch<F>(&self, request: DispatchRequest, mut on_event: F) -> Result<DispatchOutcome>
    where
        F: FnMut(&DispatchEvent) + Send,
    {
        if request.text.trim().is_empty() {
            return Err(SwitchboardError::InvalidRequest(
                "dispatch text must not be empty".into(),
            ));
        }

        debug!(
            executor = self.executor.name(),
            session = request.session_id.as_deref().unwrap_or("new"),
            "dispatching"
        );

        let (tx, mut rx) = mpsc::channel::<DispatchEvent>(256);
        let run = self.executor.execute(&request, tx);

        let consume = async {
            let mut outcome = DispatchOutcome {
                session_id: request.session_id.clone(),
                ..Default::default()
            };
            let mut result_seen = false;
            let mut error: Option<String> = None;

            while let Some(event) = rx.recv().await {
                on_event(&event);
                match event {
                    DispatchEvent::Init { session_id } => outcome.session_id = Some(session_id),
                    DispatchEvent::Text { delta } => outcome.text.push_str(&delta),
                    DispatchEvent::Result { data } => {
                        outcome.result = data;
                        result_seen = true;
                    }
                    DispatchEvent::Error { message } => {
                        error.get_or_insert(message);
                    }
                    DispatchEvent::ApprovalRequired { id, tool, args } => {
                        let approved = match &request.approver {
                            Some(approver) => approver.request(&tool, args).await,
                            None => {
                                warn!(%tool, "gated action with no approver attached, denying");
                                false
                            }
                        };
                        debug!(%id, %tool, approved, "approval resolved");
                        if let Err(e) = self.executor.resolve_approval(&id, approved).await {
                            warn!(%id, error = %e, "failed to report approval decision");
                        }
                    }
                    DispatchEvent::ToolStart { .. } | DispatchEvent::ToolEnd => {}
                }
            }
            (outcome, result_seen, error)
        };

        let (run_result, (outcome, result_seen, error)) = tokio::join!(run, consume);
        run_result?;

        if let Some(message) = error {
            return Err(SwitchboardError::Executor(message));
        }
        if !result_seen {
            return Err(SwitchboardError::Executor(
                "executor finished without a result".into(),
            ));
        }
        Ok(outcome)
    }
}
