//! # switchboard-channels
//!
//! Bridges external messaging adapters to dispatcher sessions.
//!
//! Inbound messages are mapped to a per-sender session (`"<channel>:<senderId>"`),
//! dispatched, and the reply is formatted per channel and handed to the
//! bounded [`OutboundQueue`], which retries transient failures with backoff.
//!
//! ## Supported channels
//!
//! | Channel   | Direction        | Setup                                  |
//! |-----------|------------------|----------------------------------------|
//! | Telegram  | in + out         | Bot token (`token` or `TELEGRAM_BOT_TOKEN`) |
//! | Push      | out only         | `url` + `topic` (ntfy-style endpoint)  |
//! | WebChat   | in + out         | Built-in, in-process                   |

pub mod adapter;
pub mod format;
pub mod manager;
pub mod push;
pub mod queue;
pub mod telegram;
pub mod webchat;

pub use adapter::{
    AdapterSet, ChannelAdapter, ChannelEvent, ChannelMessage, ChannelStatus, build_adapter,
};
pub use format::format_reply;
pub use manager::ChannelManager;
pub use queue::{OutboundItem, OutboundQueue, OutboundSettings, QueueStats, backoff_delay};
