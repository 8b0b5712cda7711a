//! Logging glue.
//!
//! The core treats the log sink as an external collaborator: a
//! `write_log(level, fmt, ...)` style call plus a `DEBUG`..`FATAL` level set
//! and a microsecond timestamp helper. Rather than inventing a bespoke sink, the
//! crate emits through the `log` facade, the way every other crate in this
//! workspace's lineage does, and collapses the original six levels onto
//! `log`'s five: `NOTICE` folds into `Info`, `FATAL` into `Error` (the pool
//! never aborts the process on its own).
//!
//! [`timestamp`] is kept for callers who want to reproduce the original
//! sink's `YYYY-MM-DD HH:MM:SS.uuuuuu` formatting regardless of which
//! logging backend they wire up to the `log` facade.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// Target used for every log record this crate emits.
pub(crate) const TARGET: &str = "iomp";

macro_rules! log_debug {
    ($($arg:tt)+) => { log::debug!(target: crate::log::TARGET, $($arg)+) };
}

macro_rules! log_notice {
    ($($arg:tt)+) => { log::info!(target: crate::log::TARGET, $($arg)+) };
}

macro_rules! log_warn {
    ($($arg:tt)+) => { log::warn!(target: crate::log::TARGET, $($arg)+) };
}

macro_rules! log_error {
    ($($arg:tt)+) => { log::error!(target: crate::log::TARGET, $($arg)+) };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_notice;
pub(crate) use log_warn;

/// Render the current time as `YYYY-MM-DD HH:MM:SS.uuuuuu`, UTC.
///
/// Ported from `iomp_now` in the original C sources; no `chrono`/`time`
/// dependency is pulled in for a helper this small.
pub fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() as i64;
    let micros = now.subsec_micros();

    let (y, mo, d, h, mi, s) = civil_from_unix(secs);
    let mut out = String::with_capacity(26);
    let _ = write!(
        out,
        "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{micros:06}"
    );
    out
}

/// Convert seconds since the Unix epoch (UTC) into a civil calendar date
/// and time-of-day. Howard Hinnant's `civil_from_days` algorithm, valid
/// over the full `i64` range without relying on libc's `localtime_r`.
fn civil_from_unix(secs: i64) -> (i64, u32, u32, u32, u32, u32) {
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);
    let h = (tod / 3600) as u32;
    let mi = ((tod % 3600) / 60) as u32;
    let s = (tod % 60) as u32;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d, h, mi, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 26);
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[7], b'-');
        assert_eq!(ts.as_bytes()[10], b' ');
        assert_eq!(ts.as_bytes()[13], b':');
        assert_eq!(ts.as_bytes()[16], b':');
        assert_eq!(ts.as_bytes()[19], b'.');
    }

    #[test]
    fn civil_from_unix_epoch() {
        assert_eq!(civil_from_unix(0), (1970, 1, 1, 0, 0, 0));
        // 2021-01-01T00:00:00Z
        assert_eq!(civil_from_unix(1_609_459_200), (2021, 1, 1, 0, 0, 0));
    }
}
