//! Time source used by the timer thread and the scheduling facade

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// How far out a deadline is pushed when the exact value cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Source of monotonic and wall-clock time.
///
/// Deadlines live on the monotonic timeline; the wall clock is only used to
/// translate absolute `DateTime<Utc>` submissions onto it.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn wall_clock(&self) -> DateTime<Utc>;
}

/// Clock backed by `Instant::now` and `Utc::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `base + offset`, saturating to a far-future deadline on overflow
pub(crate) fn deadline_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Map an absolute wall-clock time onto the monotonic timeline.
///
/// Times in the past map to `now`, so they fire immediately.
pub(crate) fn to_instant(clock: &dyn Clock, at: DateTime<Utc>) -> Instant {
    let now = clock.now();
    match (at - clock.wall_clock()).to_std() {
        Ok(ahead) => deadline_after(now, ahead),
        Err(_) => now,
    }
}
