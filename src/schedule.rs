//! Delayed start for unattended night-time downloads

use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Longest single sleep while waiting, so progress can be reported
const MAX_STEP: Duration = Duration::from_secs(60);

/// Returns the next wall-clock occurrence of `at` after `now`
///
/// That is today at `at` if that moment is still ahead, tomorrow at `at`
/// otherwise.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use plex_downloader::next_start;
///
/// let two_am = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
/// let evening = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(22, 0, 0).unwrap();
///
/// assert_eq!(
///     next_start(evening, two_am),
///     NaiveDate::from_ymd_opt(2024, 3, 2).unwrap().and_time(two_am)
/// );
/// ```
pub fn next_start(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        return today;
    }

    match now.date().checked_add_days(Days::new(1)) {
        Some(tomorrow) => tomorrow.and_time(at),
        // The end of the calendar; start right away
        None => now,
    }
}

/// Blocks until local time reaches `target`
///
/// `report` receives the remaining time before every sleep. Sleeps last at
/// most a minute.
pub fn wait_until<F>(target: NaiveDateTime, report: F)
where
    F: FnMut(Duration),
{
    wait_with(target, || Local::now().naive_local(), thread::sleep, report);
}

fn wait_with<C, S, F>(target: NaiveDateTime, mut now: C, mut sleep: S, mut report: F)
where
    C: FnMut() -> NaiveDateTime,
    S: FnMut(Duration),
    F: FnMut(Duration),
{
    debug!(%target, "Waiting for scheduled start");

    loop {
        let remaining = match (target - now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => break,
        };

        report(remaining);
        sleep(remaining.min(MAX_STEP));
    }
}
