//! # switchboard-cli
//!
//! Command-line interface for the Switchboard gateway.
//!
//! ## Commands
//!
//! - `switchboard start`: run the gateway (channels, cron, heartbeat, API server)
//! - `switchboard status`: config summary plus the live status of a running gateway
//! - `switchboard modules check`: check every registered worker module once
//! - `switchboard cron list|add|remove`: edit the job file
//! - `switchboard config`: print the effective configuration

pub mod commands;

pub use commands::Cli;
