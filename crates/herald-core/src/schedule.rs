//! Deterministic weekly schedule computation.

use chrono::{DateTime, Datelike, Days, Duration, Utc, Weekday};

/// The next strictly-future occurrence of `weekday` at `hour:00:00` UTC
/// after `after`. If `after` falls exactly on the target instant, the
/// occurrence one week later is returned.
pub fn next_occurrence(after: DateTime<Utc>, weekday: Weekday, hour: u32) -> DateTime<Utc> {
  let days_ahead = (7 + weekday.num_days_from_monday() as i64
    - after.weekday().num_days_from_monday() as i64)
    % 7;

  let candidate = after
    .date_naive()
    .checked_add_days(Days::new(days_ahead as u64))
    .and_then(|d| d.and_hms_opt(hour, 0, 0))
    .map(|dt| dt.and_utc())
    // hour is validated at configuration load; out-of-range only via bugs.
    .unwrap_or(after);

  if candidate > after {
    candidate
  } else {
    candidate + Duration::days(7)
  }
}

/// Seconds until the next occurrence; convenience for sleep loops.
pub fn seconds_until(now: DateTime<Utc>, weekday: Weekday, hour: u32) -> u64 {
  let next = next_occurrence(now, weekday, hour);
  (next - now).num_seconds().max(0) as u64
}

/// Validate an hour-of-day taken from configuration.
pub fn valid_hour(hour: u32) -> bool {
  hour < 24
}
