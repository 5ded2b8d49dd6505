use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use switchboard_core::{EventSink, GatewayEvent};
use switchboard_dispatch::{DispatchRequest, Dispatcher};

use crate::backup::{backup_module, restore_module};
use crate::check::HealthChecker;
use crate::registry::HealthTarget;

/// Called once per failure episode, when a target crosses the threshold.
#[async_trait]
pub trait HealthFailureHandler: Send + Sync {
    async fn on_health_failure(&self, target: &HealthTarget, error: &str);
}

/// Broadcasts the failure and does nothing else.
pub struct ReportOnly {
    sink: Arc<dyn EventSink>,
}

impl ReportOnly {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl HealthFailureHandler for ReportOnly {
    async fn on_health_failure(&self, target: &HealthTarget, error: &str) {
        warn!(module = %target.name, port = target.port, error, "module failing, self-heal disabled");
        self.sink.emit(GatewayEvent::Notice {
            message: format!(
                "Module {} (port {}) is failing: {}",
                target.name, target.port, error
            ),
        });
    }
}

/// Back up, ask the executor to repair, re-check, and roll back if the
/// repair did not take.
pub struct SelfHealer {
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
    checker: HealthChecker,
    modules_dir: PathBuf,
    backup_dir: PathBuf,
    heal_timeout: Duration,
}

enum RepairFailure {
    StillUnhealthy(String),
    Dispatch(String),
    TimedOut,
}

impl SelfHealer {
    pub fn new(
        dispatcher: Dispatcher,
        sink: Arc<dyn EventSink>,
        checker: HealthChecker,
        modules_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        heal_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            checker,
            modules_dir: modules_dir.into(),
            backup_dir: backup_dir.into(),
            heal_timeout,
        }
    }

    async fn attempt_repair(&self, target: &HealthTarget, prompt: String) -> Result<(), RepairFailure> {
        let run = self
            .dispatcher
            .dispatch(DispatchRequest::new(prompt), |_| {});
        match tokio::time::timeout(self.heal_timeout, run).await {
            Err(_) => return Err(RepairFailure::TimedOut),
            Ok(Err(e)) => return Err(RepairFailure::Dispatch(e.to_string())),
            Ok(Ok(_)) => {}
        }
        let recheck = self.checker.check(target).await;
        match recheck.error {
            None => Ok(()),
            Some(e) => Err(RepairFailure::StillUnhealthy(e)),
        }
    }

    async fn roll_back(&self, target: &HealthTarget, module_dir: &Path, reason: String) {
        match restore_module(module_dir, &self.backup_dir, &target.name).await {
            Ok(()) => {
                warn!(module = %target.name, %reason, "repair failed, module restored");
                self.sink.emit(GatewayEvent::FileChange {
                    path: module_dir.display().to_string(),
                    change: "restored".into(),
                });
                self.sink.emit(GatewayEvent::ModuleRestored {
                    module: target.name.clone(),
                    reason,
                });
            }
            Err(e) => {
                error!(module = %target.name, error = %e, "restore failed");
                self.sink.emit(GatewayEvent::HealFailed {
                    module: target.name.clone(),
                    error: format!("{reason}; restore failed: {e}"),
                });
            }
        }
    }
}

#[async_trait]
impl HealthFailureHandler for SelfHealer {
    async fn on_health_failure(&self, target: &HealthTarget, error: &str) {
        let module_dir = self.modules_dir.join(&target.name);

        let backup = match backup_module(&module_dir, &self.backup_dir, &target.name).await {
            Ok(path) => path,
            Err(e) => {
                error!(module = %target.name, error = %e, "backup failed, not attempting repair");
                self.sink.emit(GatewayEvent::HealFailed {
                    module: target.name.clone(),
                    error: format!("backup failed: {e}"),
                });
                return;
            }
        };

        info!(module = %target.name, port = target.port, error, "starting self-heal");
        self.sink.emit(GatewayEvent::HealingStarted {
            module: target.name.clone(),
            port: target.port,
            error: error.to_string(),
            backup: backup.display().to_string(),
        });
        self.sink.emit(GatewayEvent::TaskCreated {
            source: "heartbeat".into(),
            summary: format!("Repair module {}", target.name),
        });

        let prompt = heal_prompt(target, error, &module_dir, &backup);
        match self.attempt_repair(target, prompt).await {
            Ok(()) => {
                info!(module = %target.name, "module recovered after repair");
                self.sink.emit(GatewayEvent::ModuleRecovered {
                    module: target.name.clone(),
                });
            }
            Err(failure) => {
                let reason = match failure {
                    RepairFailure::StillUnhealthy(e) => format!("still unhealthy after repair: {e}"),
                    RepairFailure::Dispatch(e) => format!("repair attempt failed: {e}"),
                    RepairFailure::TimedOut => format!(
                        "repair timed out after {}s",
                        self.heal_timeout.as_secs()
                    ),
                };
                self.roll_back(target, &module_dir, reason).await;
            }
        }
    }
}

/// The diagnostic request handed to the executor.
pub fn heal_prompt(target: &HealthTarget, error: &str, module_dir: &Path, backup: &Path) -> String {
    format!(
        "The worker module \"{name}\" is failing its health check.\n\
         \n\
         - Health endpoint: http://127.0.0.1:{port}{path}\n\
         - Last error: {error}\n\
         - Module directory: {dir}\n\
         - Backup of the current state: {backup}\n\
         \n\
         Diagnose the failure and fix the module so the health endpoint \
         returns 2xx again. Only change files inside the module directory. \
         If you cannot fix it, leave the directory as it is; it will be \
         restored from the backup automatically.",
        name = target.name,
        port = target.port,
        path = target.health_path,
        dir = module_dir.display(),
        backup = backup.display(),
    )
}
