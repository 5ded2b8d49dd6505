//! # switchboard-heartbeat
//!
//! Polls auxiliary worker modules for liveness and drives the
//! backup → repair → re-check → restore cycle when one keeps failing.
//!
//! Each tick reloads the module registry, checks every target concurrently
//! under a hard per-check timeout, and advances a small per-target state
//! machine ([`HealthPhase`]). Healing fires at most once per failure episode.

pub mod backup;
pub mod check;
pub mod healer;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use backup::{backup_module, backup_path, restore_module};
pub use check::{HealthCheckResult, HealthChecker, check_module_health};
pub use healer::{HealthFailureHandler, ReportOnly, SelfHealer};
pub use registry::{HealthTarget, load_health_check_targets};
pub use state::{HealthPhase, HealthState, ModuleHealth};
pub use supervisor::{HeartbeatSupervisor, SupervisorSettings, TickReport};
