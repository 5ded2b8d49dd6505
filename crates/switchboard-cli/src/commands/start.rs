use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use switchboard_approval::ApprovalPolicy;
use switchboard_channels::ChannelManager;
use switchboard_config::{ConfigLoader, SwitchboardConfig};
use switchboard_core::{EventBus, EventSink, Result};
use switchboard_cron::CronScheduler;
use switchboard_dispatch::{Dispatcher, HttpExecutor};
use switchboard_heartbeat::{
    HealthChecker, HealthFailureHandler, HeartbeatSupervisor, ReportOnly, SelfHealer,
    SupervisorSettings,
};
use switchboard_server::AppState;

pub(super) async fn cmd_start(
    config: SwitchboardConfig,
    no_server: bool,
    config_loader: ConfigLoader,
) -> Result<()> {
    println!("Switchboard v{}", env!("CARGO_PKG_VERSION"));
    println!("   Executor: {}", config.executor.url);
    if !no_server {
        println!("   Listen:   {}", config.server.listen);
    }
    println!();

    // Kept alive for the lifetime of the gateway. Reloads reach the approval
    // policy and the heartbeat settings; everything else needs a restart.
    let _watcher = match config_loader.watch() {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };

    let bus = EventBus::default();
    let sink: Arc<dyn EventSink> = Arc::new(bus.clone());
    let executor = HttpExecutor::new(&config.executor.url, config.executor.request_timeout_secs)?;
    let dispatcher = Dispatcher::new(Arc::new(executor));

    let channels = Arc::new(ChannelManager::from_config(
        &config,
        dispatcher.clone(),
        sink.clone(),
    ));
    channels.start().await;

    let cron = if config.cron.enabled {
        let cron = Arc::new(
            CronScheduler::from_config(&config.cron, dispatcher.clone(), sink.clone())
                .with_channels(channels.clone()),
        );
        cron.start().await;
        Some(cron)
    } else {
        info!("cron disabled");
        None
    };

    let heartbeat = if config.heartbeat.enabled {
        let hb = &config.heartbeat;
        let checker = HealthChecker::new(Duration::from_millis(hb.timeout_ms))?;
        let handler: Arc<dyn HealthFailureHandler> = if hb.self_heal {
            Arc::new(SelfHealer::new(
                dispatcher.clone(),
                sink.clone(),
                checker.clone(),
                &hb.modules_dir,
                &hb.backup_dir,
                Duration::from_secs(hb.heal_timeout_secs),
            ))
        } else {
            Arc::new(ReportOnly::new(sink.clone()))
        };
        let supervisor = Arc::new(
            HeartbeatSupervisor::new(SupervisorSettings::from_config(hb), checker, handler)
                .with_live_config(config_loader.shared()),
        );
        supervisor.start();
        Some(supervisor)
    } else {
        info!("heartbeat disabled");
        None
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = if no_server {
        None
    } else {
        let mut state = AppState::new(config.server.clone(), dispatcher.clone(), bus.clone())
            .with_approval(ApprovalPolicy::from_config(&config.approval))
            .with_live_config(config_loader.shared())
            .with_channels(channels.clone());
        if let Some(cron) = &cron {
            state = state.with_cron(cron.clone());
        }
        if let Some(heartbeat) = &heartbeat {
            state = state.with_heartbeat(heartbeat.clone());
        }
        let state = Arc::new(state);
        Some(tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = switchboard_server::start_server(state, shutdown).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    };

    info!(executor = dispatcher.executor_name(), "gateway running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let _ = shutdown_tx.send(());
    if let Some(server) = server {
        let _ = server.await;
    }
    if let Some(cron) = &cron {
        cron.stop().await;
    }
    if let Some(heartbeat) = &heartbeat {
        heartbeat.stop().await;
    }
    channels.stop().await;

    info!("gateway stopped");
    Ok(())
}
