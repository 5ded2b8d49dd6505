use thiserror::Error;

/// Unified error type for the entire Switchboard gateway.
#[derive(Error, Debug)]
pub enum SwitchboardError {
    // ── Executor errors ────────────────────────────────────────
    #[error("executor error: {0}")]
    Executor(String),

    #[error("executor unreachable: {0}")]
    ExecutorUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("channel not connected: {0}")]
    ChannelNotConnected(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("delivery rejected by {channel}: {reason}")]
    DeliveryRejected { channel: String, reason: String },

    // ── Supervision errors ─────────────────────────────────────
    #[error("health check failed: {module}: {reason}")]
    Health { module: String, reason: String },

    #[error("backup error: {module}: {reason}")]
    Backup { module: String, reason: String },

    #[error("registry error: {0}")]
    Registry(String),

    // ── Cron errors ────────────────────────────────────────────
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("cron job not found: {0}")]
    JobNotFound(String),

    // ── Approval errors ────────────────────────────────────────
    #[error("approval error: {0}")]
    Approval(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SwitchboardError {
    /// Whether a failed delivery is worth retrying.
    ///
    /// Rejections and unknown destinations are permanent; everything that
    /// looks like a network or availability problem is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            SwitchboardError::Channel { .. }
            | SwitchboardError::ChannelNotConnected(_)
            | SwitchboardError::ExecutorUnavailable(_)
            | SwitchboardError::Timeout(_)
            | SwitchboardError::Io(_) => true,
            SwitchboardError::DeliveryRejected { .. } | SwitchboardError::UnknownChannel(_) => {
                false
            }
            _ => false,
        }
    }

    pub fn channel(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        SwitchboardError::Channel {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
