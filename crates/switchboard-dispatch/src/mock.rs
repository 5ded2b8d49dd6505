//! Scripted executor for deterministic testing.
//!
//! Replays pre-configured event sequences without any network traffic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use switchboard_core::{ChannelContext, Result, SessionId, SwitchboardError};

use crate::event::DispatchEvent;
use crate::executor::{DispatchRequest, Executor};

/// One canned response.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these events, then finish.
    Events(Vec<DispatchEvent>),
    /// Fail the invocation itself.
    Fail(String),
    /// Never finish.
    Hang,
}

/// What the executor was asked to do.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub text: String,
    pub session_id: Option<SessionId>,
    pub context: Option<ChannelContext>,
}

/// An executor that plays back queued [`Script`]s in order.
///
/// # Example
/// ```
/// use switchboard_dispatch::mock::ScriptedExecutor;
/// let executor = ScriptedExecutor::new()
///     .with_reply("s-1", "Hello, world!");
/// ```
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    approvals: Arc<Mutex<Vec<(String, bool)>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full turn: optional `init`, the text as one delta, then `result`.
    pub fn with_reply(self, session_id: &str, text: &str) -> Self {
        self.push(Script::Events(reply_events(Some(session_id), text)));
        self
    }

    /// Queue a turn on an already-known session (no `init`).
    pub fn with_resumed_reply(self, text: &str) -> Self {
        self.push(Script::Events(reply_events(None, text)));
        self
    }

    pub fn with_events(self, events: Vec<DispatchEvent>) -> Self {
        self.push(Script::Events(events));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.push(Script::Fail(message.to_string()));
        self
    }

    pub fn with_hang(self) -> Self {
        self.push(Script::Hang);
        self
    }

    /// Sleep this long before emitting anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Approval decisions reported back, in order.
    pub fn approvals(&self) -> Vec<(String, bool)> {
        self.approvals.lock().clone()
    }

    /// Highest number of invocations that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        self.scripts.lock().pop_front().unwrap_or_else(|| {
            Script::Events(reply_events(None, "(mock: no more queued scripts)"))
        })
    }
}

fn reply_events(session_id: Option<&str>, text: &str) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    if let Some(id) = session_id {
        events.push(DispatchEvent::init(id));
    }
    events.push(DispatchEvent::text(text));
    events.push(DispatchEvent::Result {
        data: serde_json::json!({ "text": text }),
    });
    events
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        request: &DispatchRequest,
        events: mpsc::Sender<DispatchEvent>,
    ) -> Result<()> {
        self.requests.lock().push(RecordedRequest {
            text: request.text.clone(),
            session_id: request.session_id.clone(),
            context: request.context.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let script = self.next_script();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match script {
            Script::Events(list) => {
                for event in list {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
            Script::Fail(message) => Err(SwitchboardError::ExecutorUnavailable(message)),
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn resolve_approval(&self, id: &str, approved: bool) -> Result<()> {
        self.approvals.lock().push((id.to_string(), approved));
        Ok(())
    }
}
