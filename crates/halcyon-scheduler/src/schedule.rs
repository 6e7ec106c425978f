use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};
use crate::types::{CronJob, ScheduleType};

/// Compute the next UTC execution time for `job`, or `None` if the
/// schedule is exhausted (an `at` job whose instant has passed).
///
/// `cron` jobs are evaluated with the real `cron` crate; `every` jobs are
/// first converted to an equivalent cron pattern (spec.md §4.10); `at` jobs
/// fire exactly once. `tz` is the wall-clock zone `cron`/`every` fields are
/// evaluated in (spec.md §4.10 "Timezone is configurable"); `at` jobs carry
/// an absolute instant and ignore it.
pub fn compute_next_run(job: &CronJob, from: DateTime<Utc>, tz: Tz) -> Result<Option<DateTime<Utc>>> {
    match job.schedule_type {
        ScheduleType::At => {
            let at: DateTime<Utc> = job
                .schedule
                .parse()
                .map_err(|e| SchedulerError::InvalidSchedule(format!("bad ISO instant: {e}")))?;
            Ok(if at > from { Some(at) } else { None })
        }
        ScheduleType::Every => {
            let pattern = every_to_cron_pattern(&job.schedule)?;
            next_from_cron_expr(&pattern, from, tz)
        }
        ScheduleType::Cron => next_from_cron_expr(&job.schedule, from, tz),
    }
}

/// `^\d+[smhd]$` → a cron pattern `*/<minutes> * * * *`, minutes clamped to
/// at least 1 and rounded (spec.md §4.10).
fn every_to_cron_pattern(duration: &str) -> Result<String> {
    let duration = duration.trim();
    let (digits, unit) = duration.split_at(duration.len().saturating_sub(1));
    let amount: u64 = digits
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("bad every-duration: {duration}")))?;

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86400,
        other => return Err(SchedulerError::InvalidSchedule(format!("unknown duration unit: {other}"))),
    };

    let minutes = ((seconds as f64) / 60.0).round().max(1.0) as u64;
    Ok(format!("*/{minutes} * * * *"))
}

/// The `cron` crate expects a leading seconds field; spec's standard
/// 5-field expressions get `0` prepended. `from`/the result are converted
/// through `tz` so day/hour fields land on the configured wall clock, not UTC.
fn next_from_cron_expr(expr: &str, from: DateTime<Utc>, tz: Tz) -> Result<Option<DateTime<Utc>>> {
    let six_field = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = cron::Schedule::from_str(&six_field)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("bad cron expression '{expr}': {e}")))?;
    let from_tz = from.with_timezone(&tz);
    Ok(schedule.after(&from_tz).next().map(|next| next.with_timezone(&Utc)))
}

/// Parse a timezone name, falling back to UTC and logging on failure
/// (spec.md §7 "Persisted-state corruption" — never fatal).
pub fn parse_timezone(name: &str) -> Tz {
    Tz::from_str(name).unwrap_or_else(|_| {
        tracing::warn!(timezone = name, "unknown timezone, falling back to UTC");
        Tz::UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(schedule_type: ScheduleType, schedule: &str) -> CronJob {
        CronJob {
            id: "j1".to_string(),
            name: "test".to_string(),
            schedule_type,
            schedule: schedule.to_string(),
            prompt: "do the thing".to_string(),
            delivery: "cli:main".to_string(),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn every_30s_rounds_to_one_minute_step() {
        assert_eq!(every_to_cron_pattern("30s").unwrap(), "*/1 * * * *");
    }

    #[test]
    fn every_2m_is_two_minute_step() {
        assert_eq!(every_to_cron_pattern("2m").unwrap(), "*/2 * * * *");
    }

    #[test]
    fn every_rejects_malformed_duration() {
        assert!(every_to_cron_pattern("two minutes").is_err());
    }

    #[test]
    fn at_job_in_the_future_yields_its_own_instant() {
        let future = Utc::now() + chrono::Duration::hours(1);
        let j = job(ScheduleType::At, &future.to_rfc3339());
        let next = compute_next_run(&j, Utc::now(), Tz::UTC).unwrap();
        assert!(next.is_some());
    }

    #[test]
    fn at_job_in_the_past_is_exhausted() {
        let past = Utc::now() - chrono::Duration::hours(1);
        let j = job(ScheduleType::At, &past.to_rfc3339());
        let next = compute_next_run(&j, Utc::now(), Tz::UTC).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn cron_every_minute_yields_a_future_instant() {
        let j = job(ScheduleType::Cron, "* * * * *");
        let now = Utc::now();
        let next = compute_next_run(&j, now, Tz::UTC).unwrap().unwrap();
        assert!(next > now);
    }

    #[test]
    fn cron_hour_field_is_evaluated_in_the_configured_timezone() {
        // "0 9 * * *" in America/New_York is 14:00 UTC outside DST, not 09:00 UTC.
        let j = job(ScheduleType::Cron, "0 9 * * *");
        let from = "2026-01-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = compute_next_run(&j, from, Tz::America__New_York).unwrap().unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "14:00");
    }

    #[test]
    fn unknown_timezone_name_falls_back_to_utc() {
        assert_eq!(parse_timezone("not/a/real/zone"), Tz::UTC);
        assert_eq!(parse_timezone("America/New_York"), Tz::America__New_York);
    }
}
