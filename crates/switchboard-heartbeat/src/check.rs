use serde::Serialize;
use std::time::{Duration, Instant};

use switchboard_core::{Result, SwitchboardError};

use crate::registry::HealthTarget;

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// HTTP checker for loopback health endpoints.
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| SwitchboardError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn check(&self, target: &HealthTarget) -> HealthCheckResult {
        self.check_port(target.port, &target.health_path).await
    }

    /// 2xx within the timeout is healthy. Everything else carries a cause:
    /// `timeout after Nms`, `connection failed: ...` or `HTTP <code>`.
    pub async fn check_port(&self, port: u16, path: &str) -> HealthCheckResult {
        let url = format!("http://127.0.0.1:{port}{path}");
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.client.get(&url).send()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let error = match outcome {
            Err(_) => Some(format!("timeout after {}ms", self.timeout.as_millis())),
            Ok(Err(e)) if e.is_timeout() => {
                Some(format!("timeout after {}ms", self.timeout.as_millis()))
            }
            Ok(Err(e)) => Some(format!("connection failed: {e}")),
            Ok(Ok(resp)) if resp.status().is_success() => None,
            Ok(Ok(resp)) => Some(format!("HTTP {}", resp.status().as_u16())),
        };
        HealthCheckResult {
            ok: error.is_none(),
            error,
            latency_ms,
        }
    }
}

/// One-off check with a throwaway client.
pub async fn check_module_health(port: u16, path: &str, timeout: Duration) -> HealthCheckResult {
    match HealthChecker::new(timeout) {
        Ok(checker) => checker.check_port(port, path).await,
        Err(e) => HealthCheckResult {
            ok: false,
            error: Some(e.to_string()),
            latency_ms: 0,
        },
    }
}
