use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use switchboard_core::{ChannelContext, Result, SwitchboardError};

use crate::event::DispatchEvent;
use crate::executor::{DispatchRequest, Executor};

/// Executor reached over HTTP.
///
/// The request is POSTed as JSON; the response body is newline-delimited
/// JSON, one [`DispatchEvent`] per line. Approval decisions go to
/// `<url>/approvals/<id>`.
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a ChannelContext>,
}

impl HttpExecutor {
    /// `request_timeout_secs == 0` leaves the stream unbounded.
    pub fn new(url: impl Into<String>, request_timeout_secs: u64) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(request_timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| SwitchboardError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        request: &DispatchRequest,
        events: mpsc::Sender<DispatchEvent>,
    ) -> Result<()> {
        let body = WireRequest {
            text: &request.text,
            session_id: request.session_id.as_deref(),
            context: request.context.as_ref(),
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SwitchboardError::ExecutorUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SwitchboardError::Executor(format!("HTTP {status}: {text}")));
        }

        // Lines are split on raw bytes; a chunk may end inside a UTF-8 sequence.
        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| SwitchboardError::Executor(e.to_string()))?;
            buffer.extend_from_slice(&bytes);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if !forward_line(&line, &events).await {
                    return Ok(());
                }
            }
        }
        // Trailing line without a newline.
        forward_line(&buffer, &events).await;
        Ok(())
    }

    async fn resolve_approval(&self, id: &str, approved: bool) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/approvals/{}", self.url, id))
            .json(&serde_json::json!({ "approved": approved }))
            .send()
            .await
            .map_err(|e| SwitchboardError::ExecutorUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SwitchboardError::Executor(format!(
                "approval {id} rejected with HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Returns false once the receiving side has gone away.
async fn forward_line(line: &[u8], events: &mpsc::Sender<DispatchEvent>) -> bool {
    if line.iter().all(u8::is_ascii_whitespace) {
        return true;
    }
    match serde_json::from_slice::<DispatchEvent>(line) {
        Ok(event) => {
            debug!(kind = event.kind(), "executor event");
            events.send(event).await.is_ok()
        }
        Err(e) => {
            warn!(error = %e, "skipping malformed executor event");
            true
        }
    }
}
