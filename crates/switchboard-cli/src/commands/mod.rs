mod cron;
mod modules;
mod start;

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use switchboard_config::{ConfigLoader, SwitchboardConfig};
use switchboard_core::{Result, SwitchboardError};

/// Switchboard: gateway orchestration core for a personal-assistant platform
#[derive(Parser)]
#[command(name = "switchboard", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to switchboard.toml
    #[arg(short, long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (channels + cron + heartbeat + API server)
    Start {
        /// Don't start the HTTP/WebSocket server
        #[arg(long)]
        no_server: bool,
    },
    /// Show the configuration summary and the status of a running gateway
    Status,
    /// Inspect supervised worker modules
    Modules {
        #[command(subcommand)]
        action: ModulesAction,
    },
    /// Manage scheduled jobs in the job file
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ModulesAction {
    /// Check every registered module once and print the results
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// List jobs with their next fire time
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a job (exactly one of --every, --cron, --at)
    #[command(group(ArgGroup::new("when").required(true).args(["every", "cron", "at"])))]
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// Text sent to the executor when the job fires
        #[arg(long)]
        message: String,
        /// Fixed interval: 500ms, 30s, 5m, 2h, 1d, or bare milliseconds
        #[arg(long)]
        every: Option<String>,
        /// Cron expression (5 or 6 fields, local time)
        #[arg(long)]
        cron: Option<String>,
        /// One-shot time, RFC 3339 (e.g. 2026-01-02T09:00:00Z)
        #[arg(long)]
        at: Option<String>,
        /// Deliver the reply to this channel id instead of broadcasting it
        #[arg(long, requires = "chat")]
        channel: Option<String>,
        /// Chat within --channel
        #[arg(long, requires = "channel")]
        chat: Option<String>,
    },
    /// Remove a job by id
    Remove { id: String },
}

/// Filter directive for flags and config; `RUST_LOG` still overrides it.
fn log_directive<'a>(verbose: bool, quiet: bool, flag: Option<&'a str>, config: &'a str) -> &'a str {
    if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        flag.unwrap_or(config)
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .pretty()
            .with_target(false)
            .init(),
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Config first: it decides the log format.
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let level = log_directive(
            self.verbose,
            self.quiet,
            self.log_level.as_deref(),
            &config.logging.level,
        );
        init_tracing(level, &config.logging.format);

        match self.command {
            Commands::Start { no_server } => start::cmd_start(config, no_server, config_loader).await,
            Commands::Status => Self::cmd_status(&config, config_loader.path()).await,
            Commands::Modules {
                action: ModulesAction::Check { json },
            } => modules::cmd_check(&config, json).await,
            Commands::Cron { action } => match action {
                CronAction::List { json } => cron::cmd_list(&config, json).await,
                CronAction::Add {
                    name,
                    message,
                    every,
                    cron,
                    at,
                    channel,
                    chat,
                } => {
                    let schedule = cron::schedule_from_args(every, cron, at)?;
                    let target = channel.zip(chat);
                    cron::cmd_add(&config, name, message, schedule, target).await
                }
                CronAction::Remove { id } => cron::cmd_remove(&config, &id).await,
            },
            Commands::Config { json } => Self::cmd_config(&config, json),
        }
    }

    async fn cmd_status(config: &SwitchboardConfig, path: &std::path::Path) -> Result<()> {
        println!("Switchboard v{}", env!("CARGO_PKG_VERSION"));
        println!("   Config:    {}", path.display());
        println!("   Listen:    {}", config.server.listen);
        println!("   Executor:  {}", config.executor.url);
        println!(
            "   Heartbeat: {} (every {}s, threshold {}, self-heal {})",
            on_off(config.heartbeat.enabled),
            config.heartbeat.interval_secs,
            config.heartbeat.failure_threshold,
            on_off(config.heartbeat.self_heal),
        );
        println!("   Cron:      {} ({})", on_off(config.cron.enabled), config.cron.jobs_path.display());

        let mut channels: Vec<_> = config.channels.iter().collect();
        channels.sort_by(|a, b| a.0.cmp(b.0));
        if channels.is_empty() {
            println!("   Channels:  none");
        }
        for (id, section) in channels {
            println!("   Channel:   {id} ({}, {})", section.channel_type, on_off(section.enabled));
        }
        println!();

        let listen = &config.server.listen;
        let client = reqwest::Client::new();
        let mut request = client.get(format!("http://{listen}/api/v1/status"));
        if let Some(key) = &config.server.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                let data: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| SwitchboardError::Other(e.into()))?;
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(resp) => println!("Gateway at {listen} answered {}", resp.status()),
            Err(_) => println!("Gateway is not running at {listen}"),
        }
        Ok(())
    }

    fn cmd_config(config: &SwitchboardConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| SwitchboardError::Config(e.to_string()))?
            );
        }
        Ok(())
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_directive_precedence() {
        assert_eq!(log_directive(true, false, Some("warn"), "info"), "debug");
        assert_eq!(log_directive(false, true, Some("warn"), "info"), "error");
        assert_eq!(log_directive(false, false, Some("warn"), "info"), "warn");
        assert_eq!(log_directive(false, false, None, "trace"), "trace");
    }

    #[test]
    fn test_cron_add_requires_exactly_one_schedule() {
        let base = ["switchboard", "cron", "add", "--name", "n", "--message", "m"];
        assert!(Cli::try_parse_from(base).is_err());

        let mut both = base.to_vec();
        both.extend(["--every", "5m", "--cron", "0 9 * * *"]);
        assert!(Cli::try_parse_from(both).is_err());

        let mut one = base.to_vec();
        one.extend(["--every", "5m"]);
        assert!(Cli::try_parse_from(one).is_ok());
    }

    #[test]
    fn test_cron_target_needs_both_halves() {
        let args = [
            "switchboard", "cron", "add", "--name", "n", "--message", "m", "--every", "1h",
            "--channel", "tg",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["switchboard", "-v", "-q", "status"]).is_err());
    }
}
