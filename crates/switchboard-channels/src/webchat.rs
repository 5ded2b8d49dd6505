use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};

use switchboard_core::{Result, SwitchboardError};

use crate::adapter::*;

/// A reply addressed to one webchat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatReply {
    pub chat_id: String,
    pub text: String,
}

/// WebChat channel: messages are injected in-process (by the HTTP server)
/// and replies are fanned out to whoever subscribed.
pub struct WebChatAdapter {
    id: String,
    connected: AtomicBool,
    incoming_tx: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    outgoing: broadcast::Sender<WebChatReply>,
}

impl WebChatAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        let (outgoing, _) = broadcast::channel(256);
        Self {
            id: id.into(),
            connected: AtomicBool::new(false),
            incoming_tx: Mutex::new(None),
            outgoing,
        }
    }

    /// Feed an inbound message as if it came from a client.
    pub async fn inject(&self, message: ChannelMessage) -> Result<()> {
        let tx = self.incoming_tx.lock().clone();
        let Some(tx) = tx else {
            return Err(SwitchboardError::ChannelNotConnected(self.id.clone()));
        };
        tx.send(ChannelEvent::Message(message))
            .await
            .map_err(|e| SwitchboardError::channel(&self.id, e.to_string()))
    }

    /// Receive every reply sent through this channel.
    pub fn subscribe(&self) -> broadcast::Receiver<WebChatReply> {
        self.outgoing.subscribe()
    }
}

#[async_trait]
impl ChannelAdapter for WebChatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        "webchat"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChannelEvent>> {
        let (tx, rx) = mpsc::channel(256);
        *self.incoming_tx.lock() = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        self.outgoing
            .send(WebChatReply {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
            })
            .map(|_| ())
            .map_err(|_| SwitchboardError::ChannelNotConnected(self.id.clone()))
    }

    async fn stop(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.incoming_tx.lock().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn max_delivery_attempts(&self) -> Option<u32> {
        Some(2)
    }
}
