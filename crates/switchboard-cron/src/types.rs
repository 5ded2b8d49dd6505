use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use switchboard_core::{Result, SwitchboardError};

use crate::schedule::validate_schedule;

/// When a job fires. The variants are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CronSchedule {
    /// Every `interval_ms`, counted from scheduler start.
    Interval { interval_ms: u64 },
    /// Standard five-field expression, or six with a leading seconds column.
    Cron { expression: String },
    /// Exactly once.
    Once { at: DateTime<Utc> },
}

impl CronSchedule {
    pub fn kind(&self) -> &'static str {
        match self {
            CronSchedule::Interval { .. } => "interval",
            CronSchedule::Cron { .. } => "cron",
            CronSchedule::Once { .. } => "once",
        }
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronSchedule::Interval { interval_ms } => write!(f, "every {interval_ms}ms"),
            CronSchedule::Cron { expression } => write!(f, "cron '{expression}'"),
            CronSchedule::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

/// Where a job's reply is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTarget {
    pub channel: String,
    pub chat_id: String,
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub message: String,
    pub schedule: CronSchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<CronTarget>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a job; `id` and `createdAt` are assigned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCronJob {
    pub name: String,
    pub message: String,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub target: Option<CronTarget>,
}

impl NewCronJob {
    pub fn new(name: impl Into<String>, message: impl Into<String>, schedule: CronSchedule) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            schedule,
            target: None,
        }
    }

    pub fn with_target(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.target = Some(CronTarget {
            channel: channel.into(),
            chat_id: chat_id.into(),
        });
        self
    }

    /// Validate and stamp with a fresh id and creation time.
    pub fn into_job(self) -> Result<CronJob> {
        if self.name.trim().is_empty() {
            return Err(SwitchboardError::InvalidSchedule("job name must not be empty".into()));
        }
        if self.message.trim().is_empty() {
            return Err(SwitchboardError::InvalidSchedule("job message must not be empty".into()));
        }
        validate_schedule(&self.schedule)?;

        Ok(CronJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            message: self.message,
            schedule: self.schedule,
            target: self.target,
            created_at: Utc::now(),
        })
    }
}
