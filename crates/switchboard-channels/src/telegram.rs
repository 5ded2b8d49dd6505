use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::{Result, SwitchboardError};

use crate::adapter::*;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const MAX_BACKOFF_SECS: u64 = 60;
/// Timeout for ordinary Bot API calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Slack on top of the long-poll hold time before a poll counts as hung.
const POLL_MARGIN_SECS: u64 = 15;

/// Telegram channel adapter using the Bot API (long polling).
pub struct TelegramAdapter {
    id: String,
    token: String,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    connected: Arc<AtomicBool>,
    poller: Mutex<Option<Arc<Poller>>>,
    cancel: CancellationToken,
}

/// State shared by the poll loop and `replay()`. The offset lock makes
/// sure two `getUpdates` calls never overlap, so no update is seen twice.
struct Poller {
    channel_id: String,
    client: reqwest::Client,
    base_url: String,
    offset: TokioMutex<i64>,
    events: mpsc::Sender<ChannelEvent>,
}

impl TelegramAdapter {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        // Long polls override this per request; see `poll_request_timeout`.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: id.into(),
            token: token.into(),
            api_base: DEFAULT_API_BASE.into(),
            poll_timeout_secs: 30,
            client,
            connected: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Point at a different Bot API host (self-hosted server, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn channel_err(&self, reason: impl Into<String>) -> SwitchboardError {
        SwitchboardError::channel(&self.id, reason)
    }
}

impl Poller {
    /// One `getUpdates` round. Returns the number of messages forwarded.
    async fn poll_once(&self, timeout_secs: u64) -> Result<usize> {
        let mut offset = self.offset.lock().await;
        let url = format!(
            "{}/getUpdates?offset={}&timeout={}",
            self.base_url, *offset, timeout_secs
        );
        let resp = self
            .client
            .get(&url)
            .timeout(poll_request_timeout(timeout_secs))
            .send()
            .await
            .map_err(|e| SwitchboardError::channel(&self.channel_id, e.to_string()))?;
        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SwitchboardError::channel(&self.channel_id, e.to_string()))?;

        if !status.is_success() || data["ok"].as_bool() != Some(true) {
            let desc = data["description"].as_str().unwrap_or("unknown error");
            return Err(SwitchboardError::channel(
                &self.channel_id,
                format!("getUpdates failed ({status}): {desc}"),
            ));
        }

        let mut forwarded = 0;
        for update in data["result"].as_array().into_iter().flatten() {
            if let Some(uid) = update["update_id"].as_i64() {
                *offset = (*offset).max(uid + 1);
            }
            let Some(message) = parse_update(&self.channel_id, update) else {
                debug!("skipping non-text Telegram update");
                continue;
            };
            if self.events.send(ChannelEvent::Message(message)).await.is_err() {
                return Err(SwitchboardError::ChannelNotConnected(self.channel_id.clone()));
            }
            forwarded += 1;
        }
        Ok(forwarded)
    }
}

/// Turn a Telegram update into an inbound message. Non-text updates are skipped.
fn parse_update(channel_id: &str, update: &serde_json::Value) -> Option<ChannelMessage> {
    let msg = update.get("message")?;
    let text = msg["text"].as_str()?;
    let chat_id = msg["chat"]["id"].as_i64()?;
    let from = &msg["from"];
    let sender_id = from["id"]
        .as_i64()
        .map(|id| id.to_string())
        .unwrap_or_else(|| chat_id.to_string());
    let sender_name = from["first_name"]
        .as_str()
        .or_else(|| from["username"].as_str())
        .unwrap_or("unknown")
        .to_string();
    Some(ChannelMessage {
        source: channel_id.to_string(),
        sender_id,
        sender_name,
        chat_id: chat_id.to_string(),
        text: text.to_string(),
    })
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at `max_secs`.
fn backoff_duration(consecutive_failures: u32, max_secs: u64) -> Duration {
    let secs = 1u64
        .checked_shl(consecutive_failures.saturating_sub(1).min(6))
        .unwrap_or(max_secs);
    Duration::from_secs(secs.min(max_secs))
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let poller = Arc::new(Poller {
            channel_id: self.id.clone(),
            client: self.client.clone(),
            base_url: format!("{}/bot{}", self.api_base, self.token),
            offset: TokioMutex::new(0),
            events: event_tx,
        });
        *self.poller.lock() = Some(Arc::clone(&poller));

        let connected = Arc::clone(&self.connected);
        let cancel = self.cancel.clone();
        let timeout = self.poll_timeout_secs;
        tokio::spawn(async move {
            connected.store(true, Ordering::SeqCst);
            info!(channel = %poller.channel_id, "Telegram channel connected, starting long-poll");
            let mut consecutive_failures: u32 = 0;

            loop {
                if poller.events.is_closed() {
                    info!("Telegram poll loop: event receiver dropped, stopping");
                    break;
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    r = poller.poll_once(timeout) => r,
                };
                match result {
                    Ok(_) => {
                        if consecutive_failures > 0 {
                            info!(prev_failures = consecutive_failures, "Telegram poll recovered");
                        }
                        consecutive_failures = 0;
                    }
                    Err(SwitchboardError::ChannelNotConnected(_)) => break,
                    Err(e) => {
                        consecutive_failures += 1;
                        let backoff = backoff_duration(consecutive_failures, MAX_BACKOFF_SECS);
                        warn!(error = %e, ?backoff, "Telegram poll failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            info!("Telegram channel disconnected");
        });

        Ok(event_rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.channel_err(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let data: serde_json::Value = resp.json().await.unwrap_or_default();
        let desc = data["description"]
            .as_str()
            .unwrap_or("sendMessage failed")
            .to_string();
        // 429 and 5xx are worth retrying; other 4xx (chat not found, bot
        // blocked, bad request) never will succeed.
        if status.as_u16() == 429 || status.is_server_error() {
            Err(self.channel_err(format!("HTTP {}: {desc}", status.as_u16())))
        } else {
            Err(SwitchboardError::DeliveryRejected {
                channel: self.id.clone(),
                reason: desc,
            })
        }
    }

    async fn replay(&self) -> Result<usize> {
        let poller = self.poller.lock().clone();
        let Some(poller) = poller else {
            return Err(SwitchboardError::ChannelNotConnected(self.id.clone()));
        };
        let recovered = poller.poll_once(0).await?;
        if recovered > 0 {
            info!(channel = %self.id, recovered, "replayed missed Telegram messages");
        }
        Ok(recovered)
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        self.poller.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn max_delivery_attempts(&self) -> Option<u32> {
        Some(4)
    }
}

/// The server holds a long poll open for `poll_timeout_secs`; the request
/// timeout has to outlast it.
fn poll_request_timeout(poll_timeout_secs: u64) -> Duration {
    Duration::from_secs(poll_timeout_secs.saturating_add(POLL_MARGIN_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_outlasts_long_poll() {
        assert_eq!(poll_request_timeout(30), Duration::from_secs(45));
        assert_eq!(poll_request_timeout(120), Duration::from_secs(135));
        assert!(poll_request_timeout(0) > Duration::ZERO);
        assert_eq!(poll_request_timeout(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_parse_text_update() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "first_name": "Ada"},
                "chat": {"id": -100},
                "text": "hello"
            }
        });
        let msg = parse_update("telegram", &update).unwrap();
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.sender_name, "Ada");
        assert_eq!(msg.chat_id, "-100");
        assert_eq!(msg.channel_key(), "telegram:42");
    }

    #[test]
    fn test_non_text_update_is_skipped() {
        let update = serde_json::json!({
            "update_id": 11,
            "message": {"message_id": 2, "chat": {"id": 1}, "photo": []}
        });
        assert!(parse_update("telegram", &update).is_none());
        assert!(parse_update("telegram", &serde_json::json!({"update_id": 12})).is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_duration(1, 60), Duration::from_secs(1));
        assert_eq!(backoff_duration(2, 60), Duration::from_secs(2));
        assert_eq!(backoff_duration(4, 60), Duration::from_secs(8));
        assert_eq!(backoff_duration(30, 60), Duration::from_secs(60));
    }
}
