//! # switchboard-config
//!
//! Configuration system for the Switchboard gateway. Reads from
//! `switchboard.toml` and environment variables, in that precedence order for
//! secrets (file wins) and the reverse for operational overrides.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::SwitchboardConfig;
pub use schema::{
    ApprovalConfig, ChannelConfig, ConfigWarning, CronConfig, ExecutorConfig, HeartbeatConfig,
    LoggingConfig, OutboundConfig, ServerConfig, TimeoutDecision, WarningSeverity,
};
