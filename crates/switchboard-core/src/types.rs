use serde::{Deserialize, Serialize};

/// Opaque session identifier, assigned by the executor on the first turn.
pub type SessionId = String;

/// Identifier of a configured channel instance (e.g. "telegram").
pub type ChannelId = String;

/// Where a request came from when it originated on an external channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContext {
    pub channel: ChannelId,
    pub sender_id: String,
    pub sender_name: String,
    pub chat_id: String,
}

impl ChannelContext {
    /// The `"<channel>:<senderId>"` key a conversation is tracked under.
    pub fn channel_key(&self) -> String {
        channel_key(&self.channel, &self.sender_id)
    }
}

pub fn channel_key(channel: &str, sender_id: &str) -> String {
    format!("{channel}:{sender_id}")
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
