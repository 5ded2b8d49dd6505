//! Next-fire computation for every schedule kind.

use chrono::{DateTime, Local, TimeDelta, Utc};
use cron::Schedule;
use std::str::FromStr;

use switchboard_core::{Result, SwitchboardError};

use crate::types::CronSchedule;

/// Parse a five- or six-field cron expression.
///
/// The `cron` crate wants a leading seconds column, so five-field
/// expressions get `0` prepended.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expression.trim()),
        6 => expression.trim().to_string(),
        n => {
            return Err(SwitchboardError::InvalidSchedule(format!(
                "cron expression '{expression}' has {n} fields, expected 5 or 6"
            )));
        }
    };
    Schedule::from_str(&normalized).map_err(|e| {
        SwitchboardError::InvalidSchedule(format!("invalid cron expression '{expression}': {e}"))
    })
}

/// Check the variant's own fields.
pub fn validate_schedule(schedule: &CronSchedule) -> Result<()> {
    match schedule {
        CronSchedule::Interval { interval_ms: 0 } => Err(SwitchboardError::InvalidSchedule(
            "intervalMs must be greater than zero".into(),
        )),
        CronSchedule::Interval { .. } | CronSchedule::Once { .. } => Ok(()),
        CronSchedule::Cron { expression } => parse_cron(expression).map(|_| ()),
    }
}

/// The first fire time strictly after `after`.
///
/// `anchor` is when interval counting started. A `once` job always answers
/// its `at`, even if that is already past; the caller fires it as overdue.
/// `None` means the schedule never fires again.
pub fn next_fire(
    schedule: &CronSchedule,
    anchor: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        CronSchedule::Interval { interval_ms } => {
            validate_schedule(schedule)?;
            let interval = *interval_ms as i64;
            let elapsed = (after - anchor).num_milliseconds().max(0);
            let periods = elapsed / interval + 1;
            Ok(anchor.checked_add_signed(TimeDelta::milliseconds(periods.saturating_mul(interval))))
        }
        CronSchedule::Cron { expression } => {
            let parsed = parse_cron(expression)?;
            let local = after.with_timezone(&Local);
            Ok(parsed
                .after(&local)
                .next()
                .map(|next| next.with_timezone(&Utc)))
        }
        CronSchedule::Once { at } => Ok(Some(*at)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_interval_counts_from_anchor() {
        let every_minute = CronSchedule::Interval { interval_ms: 60_000 };
        assert_eq!(next_fire(&every_minute, at(0), at(0)).unwrap(), Some(at(60)));
        assert_eq!(next_fire(&every_minute, at(0), at(59)).unwrap(), Some(at(60)));
        assert_eq!(next_fire(&every_minute, at(0), at(60)).unwrap(), Some(at(120)));
        // Missed periods are skipped, not replayed.
        assert_eq!(next_fire(&every_minute, at(0), at(601)).unwrap(), Some(at(660)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let bad = CronSchedule::Interval { interval_ms: 0 };
        assert!(validate_schedule(&bad).is_err());
        assert!(next_fire(&bad, at(0), at(0)).is_err());
    }

    #[test]
    fn test_five_and_six_field_expressions() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("30 */5 * * * *").is_ok());
        assert!(parse_cron("* * *").is_err());
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[test]
    fn test_cron_next_is_after_now() {
        let every_five = CronSchedule::Cron {
            expression: "*/5 * * * *".into(),
        };
        let now = at(17);
        let next = next_fire(&every_five, now, now).unwrap().unwrap();
        assert!(next > now);
        assert!(next - now <= TimeDelta::minutes(5));
        assert_eq!(next.timestamp() % 300, 0);
    }

    #[test]
    fn test_once_reports_its_instant_even_when_past() {
        let once = CronSchedule::Once { at: at(10) };
        assert_eq!(next_fire(&once, at(0), at(100)).unwrap(), Some(at(10)));
    }
}
