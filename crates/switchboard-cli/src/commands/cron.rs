use chrono::{DateTime, Local, Utc};

use switchboard_config::SwitchboardConfig;
use switchboard_core::{Result, SwitchboardError};
use switchboard_cron::{CronSchedule, CronStore, FileStore, NewCronJob, next_fire};

/// Parse `500ms`, `30s`, `5m`, `2h`, `1d`, or bare milliseconds.
pub(super) fn parse_interval(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let invalid = || SwitchboardError::InvalidSchedule(format!("invalid interval '{raw}'"));
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let factor = match unit {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(invalid()),
    };
    value.checked_mul(factor).ok_or_else(invalid)
}

pub(super) fn schedule_from_args(
    every: Option<String>,
    cron: Option<String>,
    at: Option<String>,
) -> Result<CronSchedule> {
    match (every, cron, at) {
        (Some(every), None, None) => Ok(CronSchedule::Interval {
            interval_ms: parse_interval(&every)?,
        }),
        (None, Some(expression), None) => Ok(CronSchedule::Cron { expression }),
        (None, None, Some(at)) => {
            let at = DateTime::parse_from_rfc3339(&at)
                .map_err(|e| SwitchboardError::InvalidSchedule(format!("invalid time '{at}': {e}")))?
                .with_timezone(&Utc);
            Ok(CronSchedule::Once { at })
        }
        _ => Err(SwitchboardError::InvalidSchedule(
            "give exactly one of --every, --cron, --at".into(),
        )),
    }
}

fn store(config: &SwitchboardConfig) -> FileStore {
    FileStore::new(&config.cron.jobs_path)
}

pub(super) async fn cmd_list(config: &SwitchboardConfig, json: bool) -> Result<()> {
    let mut jobs = store(config).load_jobs().await?;
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No scheduled jobs in {}", config.cron.jobs_path.display());
        return Ok(());
    }

    let now = Utc::now();
    for job in &jobs {
        let next = match next_fire(&job.schedule, job.created_at, now) {
            Ok(Some(at)) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            Ok(None) => "never".into(),
            Err(e) => format!("invalid ({e})"),
        };
        let target = job
            .target
            .as_ref()
            .map(|t| format!("{}/{}", t.channel, t.chat_id))
            .unwrap_or_else(|| "broadcast".into());
        println!("{}  {}", job.id, job.name);
        println!("   schedule: {}", job.schedule);
        println!("   next:     {next}");
        println!("   reply to: {target}");
    }
    Ok(())
}

pub(super) async fn cmd_add(
    config: &SwitchboardConfig,
    name: String,
    message: String,
    schedule: CronSchedule,
    target: Option<(String, String)>,
) -> Result<()> {
    let mut new = NewCronJob::new(name, message, schedule);
    if let Some((channel, chat)) = target {
        if !config.channels.contains_key(&channel) {
            return Err(SwitchboardError::UnknownChannel(channel));
        }
        new = new.with_target(channel, chat);
    }
    let job = new.into_job()?;
    store(config).save_job(&job).await?;
    println!("Added job {} ({})", job.id, job.schedule);
    if !config.cron.enabled {
        println!("Note: [cron] is disabled, the job will not fire until it is enabled");
    }
    Ok(())
}

pub(super) async fn cmd_remove(config: &SwitchboardConfig, id: &str) -> Result<()> {
    store(config).delete_job(id).await?;
    println!("Removed job {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("250").unwrap(), 250);
        assert_eq!(parse_interval("250ms").unwrap(), 250);
        assert_eq!(parse_interval("30s").unwrap(), 30_000);
        assert_eq!(parse_interval("5m").unwrap(), 300_000);
        assert_eq!(parse_interval("2h").unwrap(), 7_200_000);
        assert_eq!(parse_interval("1d").unwrap(), 86_400_000);
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("m").is_err());
        assert!(parse_interval("5 weeks").is_err());
        assert!(parse_interval("1.5h").is_err());
    }

    #[test]
    fn test_schedule_from_args() {
        let s = schedule_from_args(None, None, Some("2026-01-02T09:00:00+01:00".into())).unwrap();
        match s {
            CronSchedule::Once { at } => assert_eq!(at.to_rfc3339(), "2026-01-02T08:00:00+00:00"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(schedule_from_args(None, None, Some("tomorrow".into())).is_err());
        assert!(schedule_from_args(None, None, None).is_err());
    }

    #[tokio::test]
    async fn test_add_list_remove_against_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SwitchboardConfig::default();
        config.cron.jobs_path = dir.path().join("jobs.json");

        cmd_add(
            &config,
            "digest".into(),
            "summarise".into(),
            CronSchedule::Interval { interval_ms: 60_000 },
            None,
        )
        .await
        .unwrap();

        let jobs = store(&config).load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        cmd_list(&config, false).await.unwrap();

        cmd_remove(&config, &jobs[0].id).await.unwrap();
        assert!(store(&config).load_jobs().await.unwrap().is_empty());
        assert!(matches!(
            cmd_remove(&config, "missing").await,
            Err(SwitchboardError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_target_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SwitchboardConfig::default();
        config.cron.jobs_path = dir.path().join("jobs.json");

        let err = cmd_add(
            &config,
            "ping".into(),
            "hello".into(),
            CronSchedule::Interval { interval_ms: 1_000 },
            Some(("nowhere".into(), "1".into())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SwitchboardError::UnknownChannel(_)));
        assert!(!config.cron.jobs_path.exists());
    }
}
