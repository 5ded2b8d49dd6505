use std::sync::Arc;
use std::time::Duration;

use switchboard_config::SwitchboardConfig;
use switchboard_core::{EventBus, Result, SwitchboardError};
use switchboard_heartbeat::{HealthChecker, HeartbeatSupervisor, ReportOnly, SupervisorSettings};

/// One supervision tick, reported and never healed. Fails when any module is down.
pub(super) async fn cmd_check(config: &SwitchboardConfig, json: bool) -> Result<()> {
    let checker = HealthChecker::new(Duration::from_millis(config.heartbeat.timeout_ms))?;
    let supervisor = HeartbeatSupervisor::new(
        SupervisorSettings::from_config(&config.heartbeat),
        checker,
        Arc::new(ReportOnly::new(Arc::new(EventBus::default()))),
    );

    let report = supervisor.tick().await;
    let summary = supervisor.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if report.checked == 0 {
        println!(
            "No modules registered in {}",
            config.heartbeat.registry_path.display()
        );
    } else {
        for module in &summary {
            match &module.last_error {
                None => println!("ok    {} (port {}{})", module.name, module.port, module.health_path),
                Some(error) => println!(
                    "FAIL  {} (port {}{}): {error}",
                    module.name, module.port, module.health_path
                ),
            }
        }
        println!();
        println!("{} checked, {} failing", report.checked, report.failing.len());
    }

    if report.failing.is_empty() {
        Ok(())
    } else {
        Err(SwitchboardError::Health {
            module: report.failing.join(", "),
            reason: "health check failed".into(),
        })
    }
}
