use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/* ============================= PARSING ============================= */

/// Parse a standard 5-field cron expression or a `@descriptor` form.
///
/// The `cron` crate wants a seconds field, so a literal `0` is prepended
/// after descriptor expansion.
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let trimmed = expr.trim();
    let normalized = if let Some(descriptor) = trimmed.strip_prefix('@') {
        match descriptor {
            "yearly" | "annually" => "0 0 1 1 *",
            "monthly" => "0 0 1 * *",
            "weekly" => "0 0 * * sun",
            "daily" | "midnight" => "0 0 * * *",
            "hourly" => "0 * * * *",
            _ => return Err(format!("unknown cron descriptor {trimmed:?}")),
        }
    } else {
        trimmed
    };

    let fields = normalized.split_whitespace().count();
    if fields != 5 {
        return Err(format!(
            "invalid cron expression {expr:?}: expected 5 fields, got {fields}"
        ));
    }

    Schedule::from_str(&format!("0 {normalized}"))
        .map_err(|e| format!("invalid cron expression {expr:?}: {e}"))
}

/* ============================= NEXT FIRE ============================= */

/// Compute the next fire instant for a recurring experiment.
///
/// The result may lie in the past, which means the run is due. When the
/// controller was down across several intervals this yields exactly one
/// overdue instant (the first tick after `last_run`); firing it and
/// recording `now` as the new last-run time resumes the normal cadence
/// with no catch-up burst.
pub fn next_fire(
    expr: &str,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    let schedule = parse_cron(expr)?;
    let anchor = last_run.unwrap_or(now);
    Ok(schedule.after(&anchor).next())
}

/// True when the schedule's next tick after `last_run` has already passed.
pub fn is_due(
    expr: &str,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool, String> {
    Ok(next_fire(expr, last_run, now)?.is_some_and(|t| t <= now))
}

/* ============================= REQUEUE MERGING ============================= */

/// Smallest of the provided future instants; `None` entries are skipped.
pub fn earliest(candidates: &[Option<DateTime<Utc>>]) -> Option<DateTime<Utc>> {
    candidates.iter().flatten().copied().min()
}

/// Convert a target instant into a requeue delay, floored at one second so
/// an already-due instant reconciles promptly without a hot loop.
pub fn requeue_after(at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (at - now)
        .to_std()
        .unwrap_or_default()
        .max(std::time::Duration::from_secs(1))
}

/* ============================= TESTS ============================= */
