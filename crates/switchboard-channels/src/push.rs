use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use switchboard_core::{Result, SwitchboardError};

use crate::adapter::*;

/// Outbound-only push notifications (ntfy-style: `POST <url>/<topic>`).
///
/// A non-empty `chat_id` picks the topic; otherwise the configured default is used.
pub struct PushAdapter {
    id: String,
    url: String,
    topic: String,
    token: Option<String>,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl PushAdapter {
    pub fn new(id: impl Into<String>, url: impl Into<String>, topic: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: id.into(),
            url: url.into().trim_end_matches('/').to_string(),
            topic: topic.into(),
            token: None,
            client,
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        "push"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>> {
        // Nothing ever arrives; the sender is dropped right away.
        let (_tx, rx) = mpsc::channel(1);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        let topic = if chat_id.is_empty() { &self.topic } else { chat_id };
        let mut req = self
            .client
            .post(format!("{}/{}", self.url, topic))
            .body(text.to_string());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SwitchboardError::channel(&self.id, e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(channel = %self.id, topic, "push notification sent");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SwitchboardError::channel(&self.id, reason))
        } else {
            Err(SwitchboardError::DeliveryRejected {
                channel: self.id.clone(),
                reason,
            })
        }
    }

    async fn stop(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn max_delivery_attempts(&self) -> Option<u32> {
        Some(3)
    }

    fn receives(&self) -> bool {
        false
    }
}
