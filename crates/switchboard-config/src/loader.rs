use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use switchboard_core::{Result, SwitchboardError};

use crate::schema::{ChannelConfig, SwitchboardConfig, base_dir};

/// Loads and optionally hot-reloads the gateway configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<SwitchboardConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > SWITCHBOARD_CONFIG env > ~/.switchboard/switchboard.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("SWITCHBOARD_CONFIG") {
            return PathBuf::from(p);
        }
        base_dir().join("switchboard.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            SwitchboardConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(SwitchboardError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> SwitchboardConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<SwitchboardConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn apply_env_overrides(config: SwitchboardConfig) -> SwitchboardConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production, a map in tests).
    ///
    /// Operational settings are overridden unconditionally. Secrets only fill
    /// in what the file leaves unset.
    pub fn apply_overrides(
        mut config: SwitchboardConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SwitchboardConfig {
        if let Some(v) = lookup("SWITCHBOARD_LISTEN") {
            config.server.listen = v;
        }
        if let Some(v) = lookup("SWITCHBOARD_EXECUTOR_URL") {
            config.executor.url = v;
        }
        if let Some(v) = lookup("SWITCHBOARD_LOG_LEVEL") {
            config.logging.level = v;
        }
        if config.server.api_key.is_none() {
            config.server.api_key = lookup("SWITCHBOARD_API_KEY");
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            let telegram = config
                .channels
                .entry("telegram".into())
                .or_insert_with(|| ChannelConfig {
                    channel_type: "telegram".into(),
                    enabled: true,
                    settings: Default::default(),
                });
            if telegram.setting_str("token").is_none() {
                telegram
                    .settings
                    .insert("token".into(), serde_json::Value::String(token));
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(SwitchboardError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(parse(&raw, &self.config_path)?);
        new_config.validate().map_err(SwitchboardError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads when the config file changes.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let is_our_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == path_for_event.file_name());
                if !is_our_file {
                    return;
                }

                info!("config file changed, reloading");
                let raw = match std::fs::read_to_string(&path_for_event) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "failed to read config file during hot-reload");
                        return;
                    }
                };
                match parse(&raw, &path_for_event)
                    .map(ConfigLoader::apply_env_overrides)
                    .and_then(|c| c.validate().map(|_| c).map_err(SwitchboardError::Config))
                {
                    Ok(new_config) => {
                        *config.write() = new_config;
                        info!("configuration hot-reloaded successfully");
                    }
                    Err(e) => {
                        warn!(error = %e, "config file has errors, keeping current config");
                    }
                }
            })
            .map_err(|e| SwitchboardError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors write a temp file and rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                SwitchboardError::Config(format!("failed to watch config directory: {}", e))
            })?;

        Ok(watcher)
    }
}

fn parse(raw: &str, path: &Path) -> Result<SwitchboardConfig> {
    toml::from_str::<SwitchboardConfig>(raw).map_err(|e| {
        SwitchboardError::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}
