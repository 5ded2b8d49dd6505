use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use switchboard_config::ChannelConfig;
use switchboard_core::{ChannelContext, Result, SwitchboardError, channel_key};

use crate::push::PushAdapter;
use crate::telegram::TelegramAdapter;
use crate::webchat::WebChatAdapter;

/// An inbound message from an external channel. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Channel id the message arrived on.
    pub source: String,
    pub sender_id: String,
    pub sender_name: String,
    pub chat_id: String,
    pub text: String,
}

impl ChannelMessage {
    pub fn channel_key(&self) -> String {
        channel_key(&self.source, &self.sender_id)
    }

    pub fn context(&self) -> ChannelContext {
        ChannelContext {
            channel: self.source.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

/// Events emitted by a channel adapter.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(ChannelMessage),
    Connected,
    Disconnected(Option<String>),
}

/// Per-channel snapshot for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub id: String,
    pub channel_type: String,
    pub enabled: bool,
    pub connected: bool,
    pub inbound: bool,
}

/// Adapters by channel id, shared by the manager and the delivery queue.
pub type AdapterSet = Arc<RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>>;

/// Trait implemented by each channel adapter.
///
/// Adapters are shared behind `Arc`, so every method takes `&self` and
/// mutable state lives behind interior locks.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique identifier for this channel instance.
    fn id(&self) -> &str;

    /// Channel type name ("telegram", "push", "webchat").
    fn channel_type(&self) -> &str;

    /// Start the adapter. Returns a receiver for inbound events.
    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>>;

    /// Deliver one already-formatted chunk to `chat_id`.
    ///
    /// Errors are classified with [`SwitchboardError::is_transient`].
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Redeliver messages missed while the process was down.
    /// Returns how many were recovered.
    async fn replay(&self) -> Result<usize> {
        Ok(0)
    }

    /// Stop the adapter gracefully.
    async fn stop(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Delivery attempt cap for this platform; `None` uses the queue default.
    fn max_delivery_attempts(&self) -> Option<u32> {
        None
    }

    /// Whether this adapter produces inbound messages at all.
    fn receives(&self) -> bool {
        true
    }
}

/// Build an adapter from its `[channels.<id>]` section.
pub fn build_adapter(id: &str, config: &ChannelConfig) -> Result<Arc<dyn ChannelAdapter>> {
    match config.channel_type.as_str() {
        "telegram" => {
            let token = config.setting_str("token").ok_or_else(|| {
                SwitchboardError::Config(format!("channels.{id}: telegram requires a token"))
            })?;
            let mut adapter = TelegramAdapter::new(id, token);
            if let Some(base) = config.setting_str("api_base") {
                adapter = adapter.with_api_base(base);
            }
            if let Some(secs) = config.settings.get("poll_timeout_secs").and_then(|v| v.as_u64()) {
                adapter = adapter.with_poll_timeout(secs);
            }
            Ok(Arc::new(adapter))
        }
        "push" => {
            let url = config.setting_str("url").ok_or_else(|| {
                SwitchboardError::Config(format!("channels.{id}: push requires a url"))
            })?;
            let topic = config.setting_str("topic").unwrap_or(id);
            let mut adapter = PushAdapter::new(id, url, topic);
            if let Some(token) = config.setting_str("token") {
                adapter = adapter.with_token(token);
            }
            Ok(Arc::new(adapter))
        }
        "webchat" => Ok(Arc::new(WebChatAdapter::new(id))),
        other => Err(SwitchboardError::UnknownChannel(format!(
            "{id} has unsupported type '{other}'"
        ))),
    }
}
