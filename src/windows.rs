use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::crd::TimeWindow;

/* ============================= TOKENS ============================= */

pub const WEEKDAY_TOKENS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Parse `HH:MM` into hours and minutes, bounds-checked.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 { None } else { Some((h, m)) }
}

fn window_tz(timezone: Option<&str>) -> Tz {
    timezone.and_then(|s| s.parse().ok()).unwrap_or(chrono_tz::UTC)
}

/* ============================= MEMBERSHIP ============================= */

/// True when `now` falls inside at least one of `windows`.
/// An empty list matches nothing.
pub fn is_within_any(windows: &[TimeWindow], now: DateTime<Utc>) -> bool {
    windows.iter().any(|w| contains(w, now))
}

/// Allowed-window semantics: an empty list means no restriction.
pub fn allows(windows: &[TimeWindow], now: DateTime<Utc>) -> bool {
    windows.is_empty() || is_within_any(windows, now)
}

fn contains(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    match window {
        TimeWindow::Recurring { start, end, days_of_week, timezone } => {
            let (Some((sh, sm)), Some((eh, em))) = (parse_hhmm(start), parse_hhmm(end)) else {
                return false;
            };
            let tz = window_tz(timezone.as_deref());
            let local = now.with_timezone(&tz);
            let minute_of_day = local.hour() * 60 + local.minute();
            let start_min = sh * 60 + sm;
            let end_min = eh * 60 + em;
            let wraps = end_min <= start_min;

            let inside = if wraps {
                minute_of_day >= start_min || minute_of_day < end_min
            } else {
                minute_of_day >= start_min && minute_of_day < end_min
            };
            if !inside {
                return false;
            }

            let Some(days) = days_of_week.as_ref().filter(|d| !d.is_empty()) else {
                return true;
            };
            // The post-midnight tail of a wrap-around window belongs to the
            // day the window started on.
            let effective_day = if wraps && minute_of_day < end_min {
                local.date_naive().pred_opt().map(|d| d.weekday())
            } else {
                Some(local.weekday())
            };
            effective_day
                .is_some_and(|d| days.iter().any(|t| t == weekday_token(d)))
        }
        TimeWindow::Absolute { start, end } => {
            let (Ok(start_ts), Ok(end_ts)) = (
                DateTime::parse_from_rfc3339(start),
                DateTime::parse_from_rfc3339(end),
            ) else {
                return false;
            };
            start_ts.with_timezone(&Utc) <= now && now < end_ts.with_timezone(&Utc)
        }
    }
}

/* ============================= BOUNDARIES ============================= */

/// The next instant at which some window opens or closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBoundary {
    pub at: DateTime<Utc>,
    /// True when the boundary is a window opening.
    pub opening: bool,
}

/// Smallest future boundary over all `windows`, or `None` when nothing lies
/// ahead (e.g. only already-closed absolute windows).
///
/// Recurring windows are scanned over the coming 7 days.
pub fn next_boundary(windows: &[TimeWindow], now: DateTime<Utc>) -> Option<WindowBoundary> {
    let mut best: Option<WindowBoundary> = None;
    for window in windows {
        for b in window_boundaries(window, now) {
            if best.is_none_or(|cur| b.at < cur.at) {
                best = Some(b);
            }
        }
    }
    best
}

fn window_boundaries(window: &TimeWindow, now: DateTime<Utc>) -> Vec<WindowBoundary> {
    match window {
        TimeWindow::Recurring { start, end, days_of_week, timezone } => {
            let (Some((sh, sm)), Some((eh, em))) = (parse_hhmm(start), parse_hhmm(end)) else {
                return Vec::new();
            };
            let tz = window_tz(timezone.as_deref());
            let today = now.with_timezone(&tz).date_naive();
            let wraps = eh * 60 + em <= sh * 60 + sm;
            let days = days_of_week.as_ref().filter(|d| !d.is_empty());

            let mut out = Vec::new();
            // Offset -1 catches the close of a wrap-around window that
            // started yesterday.
            for offset in -1..=7i64 {
                let Some(date) = today.checked_add_signed(Duration::days(offset)) else {
                    continue;
                };
                if let Some(days) = days
                    && !days.iter().any(|t| t == weekday_token(date.weekday()))
                {
                    continue;
                }
                if let Some(open) = local_instant(&tz, date, sh, sm)
                    && open > now
                {
                    out.push(WindowBoundary { at: open, opening: true });
                }
                let end_date = if wraps { date.succ_opt() } else { Some(date) };
                if let Some(end_date) = end_date
                    && let Some(close) = local_instant(&tz, end_date, eh, em)
                    && close > now
                {
                    out.push(WindowBoundary { at: close, opening: false });
                }
            }
            out
        }
        TimeWindow::Absolute { start, end } => {
            let mut out = Vec::new();
            if let Ok(start_ts) = DateTime::parse_from_rfc3339(start)
                && start_ts.with_timezone(&Utc) > now
            {
                out.push(WindowBoundary { at: start_ts.with_timezone(&Utc), opening: true });
            }
            if let Ok(end_ts) = DateTime::parse_from_rfc3339(end)
                && end_ts.with_timezone(&Utc) > now
            {
                out.push(WindowBoundary { at: end_ts.with_timezone(&Utc), opening: false });
            }
            out
        }
    }
}

/// Resolve a local wall-clock time in `tz` to a UTC instant.
/// Local times that do not exist (DST gap) are skipped.
fn local_instant(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_time(NaiveTime::from_hms_opt(hour, minute, 0)?);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/* ============================= TESTS ============================= */
