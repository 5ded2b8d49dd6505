use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration, mapped from `switchboard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub executor: ExecutorConfig,
    pub heartbeat: HeartbeatConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub outbound: OutboundConfig,
    pub cron: CronConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

/// `~/.switchboard`, the default home for state files.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen address.
    pub listen: String,
    /// Optional bearer key for the `/api` routes.
    pub api_key: Option<String>,
    /// Enable permissive CORS (for front-end development).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3800".into(),
            api_key: None,
            cors: false,
        }
    }
}

// ── Executor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Endpoint that accepts a dispatch request and streams NDJSON events.
    pub url: String,
    /// Upper bound for a single connect + stream. 0 = unbounded.
    pub request_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3900/dispatch".into(),
            request_timeout_secs: 0,
        }
    }
}

// ── Heartbeat ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Seconds between supervision ticks.
    pub interval_secs: u64,
    /// Hard timeout for one health check.
    pub timeout_ms: u64,
    /// Consecutive failures before healing is triggered.
    pub failure_threshold: u32,
    /// JSON list of `{name, port?, status}` entries.
    pub registry_path: PathBuf,
    /// Directory holding one sub-directory (with `manifest.json`) per module.
    pub modules_dir: PathBuf,
    /// Where module backups are kept, one directory per module name.
    pub backup_dir: PathBuf,
    /// Upper bound for the healing dispatch.
    pub heal_timeout_secs: u64,
    /// When false, a failing module is only reported, never healed.
    pub self_heal: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_ms: 5_000,
            failure_threshold: 3,
            registry_path: base.join("modules.json"),
            modules_dir: base.join("modules"),
            backup_dir: base.join("backups"),
            heal_timeout_secs: 600,
            self_heal: true,
        }
    }
}

// ── Channels ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Adapter type: "telegram", "push", "webchat".
    #[serde(rename = "type")]
    pub channel_type: String,
    /// Whether this channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Adapter-specific settings (tokens, URLs, topics, ...).
    #[serde(flatten)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl ChannelConfig {
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }
}

// ── Outbound delivery ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Maximum queued items; the oldest is evicted when full.
    pub capacity: usize,
    /// Attempt cap for adapters that don't declare their own.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Concurrent delivery workers.
    pub workers: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            workers: 2,
        }
    }
}

// ── Cron ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub enabled: bool,
    /// JSON file holding the job list.
    pub jobs_path: PathBuf,
    /// How often due jobs are checked.
    pub tick_ms: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs_path: base_dir().join("cron").join("jobs.json"),
            tick_ms: 1_000,
        }
    }
}

// ── Approval ───────────────────────────────────────────────────

/// What an unanswered approval request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutDecision {
    Deny,
    Approve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub timeout_secs: u64,
    pub on_timeout: TimeoutDecision,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            on_timeout: TimeoutDecision::Deny,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

pub const CHANNEL_TYPES: &[&str] = &["telegram", "push", "webchat"];

impl SwitchboardConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Server ───
        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:3800'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "server.api_key".into(),
                message: "no API key set while server is network-accessible".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set server.api_key or bind to 127.0.0.1".into()),
            });
        }

        // ── Executor ───
        if !self.executor.url.starts_with("http://") && !self.executor.url.starts_with("https://")
        {
            warnings.push(ConfigWarning {
                field: "executor.url".into(),
                message: format!("'{}' is not an http(s) URL", self.executor.url),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Heartbeat ───
        if self.heartbeat.failure_threshold == 0 {
            warnings.push(ConfigWarning {
                field: "heartbeat.failure_threshold".into(),
                message: "threshold is 0, healing would fire before any failure".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use 3 or more to ride out restarts".into()),
            });
        }
        if self.heartbeat.interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "heartbeat.interval_secs".into(),
                message: "interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if self.heartbeat.timeout_ms >= self.heartbeat.interval_secs.saturating_mul(1_000)
            && self.heartbeat.interval_secs > 0
        {
            warnings.push(ConfigWarning {
                field: "heartbeat.timeout_ms".into(),
                message: "check timeout is not shorter than the tick interval".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Ticks may overlap with slow modules".into()),
            });
        }

        // ── Outbound ───
        if self.outbound.capacity == 0 {
            warnings.push(ConfigWarning {
                field: "outbound.capacity".into(),
                message: "capacity is 0, every reply would be evicted".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if self.outbound.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "outbound.max_attempts".into(),
                message: "max_attempts is 0, nothing would ever be sent".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to at least 1".into()),
            });
        }

        // ── Approval ───
        if self.approval.on_timeout == TimeoutDecision::Approve {
            warnings.push(ConfigWarning {
                field: "approval.on_timeout".into(),
                message: "unanswered approval requests will be APPROVED".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use \"deny\" unless every gated tool is harmless".into()),
            });
        }

        // ── Channels ───
        for (id, ch) in &self.channels {
            if !CHANNEL_TYPES.contains(&ch.channel_type.as_str()) {
                warnings.push(ConfigWarning {
                    field: format!("channels.{}.type", id),
                    message: format!("unknown channel type '{}'", ch.channel_type),
                    severity: WarningSeverity::Warning,
                    hint: Some(format!("Supported: {}", CHANNEL_TYPES.join(", "))),
                });
            }
            if ch.channel_type == "telegram" && ch.enabled && ch.setting_str("token").is_none() {
                warnings.push(ConfigWarning {
                    field: format!("channels.{}.token", id),
                    message: "telegram channel has no bot token".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some("Set token or TELEGRAM_BOT_TOKEN".into()),
                });
            }
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
