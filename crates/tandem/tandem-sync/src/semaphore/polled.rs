//! Timed wait for platforms without `sem_timedwait`.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

const FIRST_BACKOFF: Duration = Duration::from_micros(50);
const MAX_BACKOFF: Duration = Duration::from_millis(5);

pub(super) fn wait_timeout(sem: *mut libc::sem_t, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut backoff = FIRST_BACKOFF;
    loop {
        if super::try_wait_raw(sem)? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        thread::sleep(backoff.min(deadline - now));
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
