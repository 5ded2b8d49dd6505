use serde::Serialize;

/// Where a target sits in its failure episode.
///
/// `Healthy` → `Degrading` → `Failing` → `Healing`, and back to `Healthy` on
/// the first success. Only the `Failing` → `Healing` edge triggers a heal, so
/// an episode can heal at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum HealthPhase {
    #[default]
    Healthy,
    Degrading { failures: u32 },
    Failing { failures: u32 },
    Healing { failures: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct HealthState {
    phase: HealthPhase,
    last_error: Option<String>,
}

impl HealthState {
    pub fn phase(&self) -> HealthPhase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.phase {
            HealthPhase::Healthy => 0,
            HealthPhase::Degrading { failures }
            | HealthPhase::Failing { failures }
            | HealthPhase::Healing { failures } => failures,
        }
    }

    pub fn healing_triggered(&self) -> bool {
        matches!(self.phase, HealthPhase::Healing { .. })
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the phase the target was in before the reset.
    pub fn record_success(&mut self) -> HealthPhase {
        self.last_error = None;
        std::mem::take(&mut self.phase)
    }

    pub fn record_failure(&mut self, error: impl Into<String>, threshold: u32) -> HealthPhase {
        let failures = self.consecutive_failures().saturating_add(1);
        self.last_error = Some(error.into());
        self.phase = match self.phase {
            HealthPhase::Healing { .. } => HealthPhase::Healing { failures },
            _ if failures >= threshold => HealthPhase::Failing { failures },
            _ => HealthPhase::Degrading { failures },
        };
        self.phase
    }

    /// Move `Failing` into `Healing`. True only for the call that made the move.
    pub fn begin_healing(&mut self) -> bool {
        match self.phase {
            HealthPhase::Failing { failures } => {
                self.phase = HealthPhase::Healing { failures };
                true
            }
            _ => false,
        }
    }
}

/// Snapshot row for the operational surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleHealth {
    pub name: String,
    pub port: u16,
    pub health_path: String,
    #[serde(flatten)]
    pub phase: HealthPhase,
    pub consecutive_failures: u32,
    pub healing_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
