use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_config::{HeartbeatConfig, SwitchboardConfig};

use crate::check::HealthChecker;
use crate::healer::HealthFailureHandler;
use crate::registry::{HealthTarget, load_health_check_targets};
use crate::state::{HealthPhase, HealthState, ModuleHealth};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub registry_path: PathBuf,
    pub modules_dir: PathBuf,
    pub interval: Duration,
    pub failure_threshold: u32,
}

impl SupervisorSettings {
    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self {
            registry_path: config.registry_path.clone(),
            modules_dir: config.modules_dir.clone(),
            interval: Duration::from_secs(config.interval_secs),
            failure_threshold: config.failure_threshold.max(1),
        }
    }
}

/// What one tick saw.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub checked: usize,
    pub healthy: Vec<String>,
    pub failing: Vec<String>,
    /// Targets whose healing was triggered by this tick.
    pub triggered: Vec<String>,
}

struct Tracked {
    target: HealthTarget,
    state: HealthState,
}

/// Clears a module's in-flight mark when its heal task ends or is aborted.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}

/// Owns the per-target health state and runs the supervision loop.
pub struct HeartbeatSupervisor {
    settings: SupervisorSettings,
    /// When set, `[heartbeat]` is re-read from here on every tick.
    live: Option<Arc<RwLock<SwitchboardConfig>>>,
    checker: HealthChecker,
    handler: Arc<dyn HealthFailureHandler>,
    states: Mutex<HashMap<String, Tracked>>,
    healing: Mutex<JoinSet<()>>,
    /// Modules with a heal task still running.
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Serialises ticks from the loop and from on-demand checks.
    tick_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        checker: HealthChecker,
        handler: Arc<dyn HealthFailureHandler>,
    ) -> Self {
        Self {
            settings,
            live: None,
            checker,
            handler,
            states: Mutex::new(HashMap::new()),
            healing: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tick_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Follow a config that may be swapped out by a reload. Threshold,
    /// interval and registry paths then track the latest `[heartbeat]`.
    pub fn with_live_config(mut self, config: Arc<RwLock<SwitchboardConfig>>) -> Self {
        self.live = Some(config);
        self
    }

    /// Settings in effect right now.
    pub fn settings(&self) -> SupervisorSettings {
        match &self.live {
            Some(config) => SupervisorSettings::from_config(&config.read().heartbeat),
            None => self.settings.clone(),
        }
    }

    /// Reload targets, check all of them, advance their state, and kick off
    /// healing where an episode just crossed the threshold.
    ///
    /// Healing runs in the background; see [`Self::wait_for_healing`]. A
    /// module whose previous heal is still running stays `Failing` and is
    /// triggered by the first failing tick after that heal finishes.
    pub async fn tick(&self) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        let settings = self.settings();
        let targets = load_health_check_targets(&settings.registry_path, &settings.modules_dir);
        let results = join_all(targets.iter().map(|t| self.checker.check(t))).await;

        let mut report = TickReport {
            checked: targets.len(),
            ..Default::default()
        };
        let mut to_heal = Vec::new();
        {
            let mut states = self.states.lock();
            states.retain(|name, _| targets.iter().any(|t| &t.name == name));

            for (target, result) in targets.into_iter().zip(results) {
                let tracked = states.entry(target.name.clone()).or_insert_with(|| Tracked {
                    target: target.clone(),
                    state: HealthState::default(),
                });
                tracked.target = target;
                let name = tracked.target.name.clone();

                match result.error {
                    None => {
                        let previous = tracked.state.record_success();
                        if previous != HealthPhase::Healthy {
                            info!(module = %name, "module healthy again");
                        }
                        report.healthy.push(name);
                    }
                    Some(error) => {
                        let phase = tracked
                            .state
                            .record_failure(error.clone(), settings.failure_threshold);
                        debug!(module = %name, ?phase, %error, "health check failed");
                        let busy = self.in_flight.lock().contains(&name);
                        if busy && matches!(phase, HealthPhase::Failing { .. }) {
                            debug!(module = %name, "previous heal still running, deferring");
                        } else if tracked.state.begin_healing() {
                            warn!(
                                module = %name,
                                port = tracked.target.port,
                                failures = tracked.state.consecutive_failures(),
                                "failure threshold reached"
                            );
                            to_heal.push((tracked.target.clone(), error));
                            report.triggered.push(name.clone());
                        }
                        report.failing.push(name);
                    }
                }
            }
        }

        if !to_heal.is_empty() {
            let mut healing = self.healing.lock();
            while healing.try_join_next().is_some() {}
            for (target, error) in to_heal {
                let handler = Arc::clone(&self.handler);
                self.in_flight.lock().insert(target.name.clone());
                let marker = InFlight {
                    set: Arc::clone(&self.in_flight),
                    name: target.name.clone(),
                };
                healing.spawn(async move {
                    let _marker = marker;
                    handler.on_health_failure(&target, &error).await;
                });
            }
        }
        report
    }

    /// Heal tasks still held, running or finished but not yet reaped.
    pub fn healing_backlog(&self) -> usize {
        self.healing.lock().len()
    }

    /// Wait until every healing task started so far has finished.
    pub async fn wait_for_healing(&self) {
        let mut set = std::mem::take(&mut *self.healing.lock());
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "healing task panicked");
            }
        }
    }

    /// Current state for every known target, sorted by name.
    pub fn summary(&self) -> Vec<ModuleHealth> {
        let states = self.states.lock();
        let mut rows: Vec<ModuleHealth> = states
            .values()
            .map(|t| ModuleHealth {
                name: t.target.name.clone(),
                port: t.target.port,
                health_path: t.target.health_path.clone(),
                phase: t.state.phase(),
                consecutive_failures: t.state.consecutive_failures(),
                healing_triggered: t.state.healing_triggered(),
                last_error: t.state.last_error().map(str::to_string),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn state_of(&self, name: &str) -> Option<HealthState> {
        self.states.lock().get(name).map(|t| t.state.clone())
    }

    /// Run `tick()` every interval until [`Self::stop`].
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let settings = self.settings();
        info!(
            interval_secs = settings.interval.as_secs(),
            threshold = settings.failure_threshold,
            "heartbeat supervisor started"
        );
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    report = this.tick() => {
                        debug!(checked = report.checked, failing = report.failing.len(), "heartbeat tick");
                    }
                }
                // Re-read each round so a reloaded interval applies to the next wait.
                let interval = this.settings().interval;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));
    }

    /// Halt the loop. No tick starts or completes after this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("heartbeat supervisor stopped");
    }
}
