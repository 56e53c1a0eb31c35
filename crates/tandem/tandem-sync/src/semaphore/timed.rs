//! Timed wait on top of `sem_timedwait`.

use std::io;
use std::time::{Duration, Instant};

fn realtime_after(delay: Duration) -> io::Result<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut nsec = now.tv_nsec as i64 + i64::from(delay.subsec_nanos());
    let mut sec = now.tv_sec as i64 + delay.as_secs() as i64;
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    Ok(libc::timespec {
        tv_sec: sec as libc::time_t,
        tv_nsec: nsec as libc::c_long,
    })
}

/// Waits until `timeout` elapses on the monotonic clock.
///
/// `sem_timedwait` measures against CLOCK_REALTIME, so the deadline is re-armed
/// after signals and after any wake-up that happens before the monotonic
/// deadline.
pub(super) fn wait_timeout(sem: *mut libc::sem_t, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let abs = realtime_after(remaining)?;
        // SAFETY: `sem` is open for the duration of the call; `abs` is valid.
        if unsafe { libc::sem_timedwait(sem, &abs) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::ETIMEDOUT) => continue,
            _ => return Err(err),
        }
    }
}
