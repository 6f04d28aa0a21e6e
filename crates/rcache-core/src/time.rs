//! Process-relative second clock.
//!
//! TTL bookkeeping does not need wall-clock precision, it needs a cheap,
//! monotonic, second-granularity counter. Every thread calls [`update`] once
//! per event-loop round; everything else reads the cached value through
//! [`now`] without a syscall.
//!
//! The counter starts at [`TIME_START_OFFSET`] rather than 0 so that an
//! expiry of 1 ("expire immediately") is already in the past when the
//! process is seconds old, and so no item ever carries age 0.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Seconds since process start, the unit all expiry fields are kept in.
pub type RelTime = u32;

/// Exptime values above this many seconds are absolute unix timestamps.
/// Inherited from the memcached protocol; must not change.
pub const TIME_MAXDELTA: i64 = 30 * 24 * 60 * 60;

/// Initial value of the relative clock.
pub const TIME_START_OFFSET: u32 = 2;

/// Expiry encoding for "never expires".
pub const TIME_NEVER: RelTime = u32::MAX - 1;

struct Anchor {
    instant: Instant,
    unix: u64,
}

static ANCHOR: OnceLock<Anchor> = OnceLock::new();
static NOW: AtomicU32 = AtomicU32::new(TIME_START_OFFSET);

fn anchor() -> &'static Anchor {
    ANCHOR.get_or_init(|| Anchor {
        instant: Instant::now(),
        unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    })
}

/// Record the process start time. Idempotent; the first caller wins.
pub fn setup() {
    let _ = anchor();
    update();
}

/// Refresh the cached clock. Called after every event wait.
pub fn update() {
    let a = anchor();
    let elapsed = a.instant.elapsed().as_secs();
    NOW.store(
        elapsed.saturating_add(TIME_START_OFFSET as u64).min(TIME_NEVER as u64 - 1) as u32,
        Ordering::Relaxed,
    );
}

/// Current relative time in seconds.
#[inline]
pub fn now() -> RelTime {
    NOW.load(Ordering::Relaxed)
}

/// Unix timestamp of process start.
#[inline]
pub fn started() -> u64 {
    anchor().unix
}

/// Current absolute unix time, at second granularity.
#[inline]
pub fn now_unix() -> u64 {
    started() + (now() - TIME_START_OFFSET) as u64
}

/// Translate a protocol exptime into a relative expiry.
///
/// - `0` → never expires
/// - negative → already expired
/// - `(0, 30 days]` → relative to now
/// - above 30 days → absolute unix seconds (values at or before process
///   start collapse to "already expired" instead of underflowing)
pub fn reltime(exptime: i64) -> RelTime {
    if exptime == 0 {
        return TIME_NEVER;
    }
    if exptime < 0 {
        return 1;
    }
    if exptime > TIME_MAXDELTA {
        let start = started() as i64;
        if exptime <= start {
            return 1;
        }
        return ((exptime - start) as u64 + TIME_START_OFFSET as u64).min(TIME_NEVER as u64 - 1)
            as RelTime;
    }
    now().saturating_add(exptime as u32).min(TIME_NEVER - 1)
}

/// Days-from-civil inverse (Howard Hinnant's algorithm), used by the log
/// writers to stamp lines without pulling in a date-time crate.
pub fn unix_to_civil(unix: u64) -> (i64, u32, u32, u32, u32, u32) {
    let days = (unix / 86_400) as i64;
    let secs = unix % 86_400;
    let (h, m, s) = (
        (secs / 3600) as u32,
        ((secs % 3600) / 60) as u32,
        (secs % 60) as u32,
    );

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let mth = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if mth <= 2 { y + 1 } else { y };

    (y, mth, d, h, m, s)
}
