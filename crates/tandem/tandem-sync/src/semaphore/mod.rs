//! Named counting semaphore.

use crate::SyncError;
use std::ffi::CString;
use std::io;
use std::time::Duration;

#[cfg(not(target_vendor = "apple"))]
#[path = "timed.rs"]
mod imp;

#[cfg(target_vendor = "apple")]
#[path = "polled.rs"]
mod imp;

/// A POSIX named semaphore, created with count zero if it does not exist.
pub struct NamedSemaphore {
    name: String,
    sem: *mut libc::sem_t,
}

// SAFETY: sem_post/sem_wait/sem_trywait are thread-safe on a shared handle and
// the handle itself is process-wide.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

fn c_name(name: &str) -> Result<CString, SyncError> {
    if !name.starts_with('/') {
        return Err(SyncError::InvalidName(name.to_owned()));
    }
    CString::new(name).map_err(|_| SyncError::InvalidName(name.to_owned()))
}

/// One `sem_trywait`: `Ok(false)` if the count is zero.
fn try_wait_raw(sem: *mut libc::sem_t) -> io::Result<bool> {
    loop {
        // SAFETY: `sem` is an open semaphore handle for as long as its owner lives.
        if unsafe { libc::sem_trywait(sem) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => return Ok(false),
            Some(libc::EINTR) => continue,
            _ => return Err(err),
        }
    }
}

fn wait_forever(sem: *mut libc::sem_t) -> io::Result<()> {
    loop {
        // SAFETY: see `try_wait_raw`.
        if unsafe { libc::sem_wait(sem) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

impl NamedSemaphore {
    /// Opens `name`, creating it with a count of zero if needed.
    pub fn create_or_open(name: &str) -> Result<Self, SyncError> {
        let c = c_name(name)?;
        // SAFETY: `c` is NUL-terminated; mode and value are passed as c_uint as
        // the variadic sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                c.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(SyncError::ResourceUnavailable {
                name: name.to_owned(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            name: name.to_owned(),
            sem,
        })
    }

    /// Removes `name` from the OS namespace. Open handles keep working.
    ///
    /// Returns `Ok(false)` if the name did not exist.
    pub fn unlink(name: &str) -> Result<bool, SyncError> {
        let c = c_name(name)?;
        // SAFETY: `c` is NUL-terminated.
        if unsafe { libc::sem_unlink(c.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            return Ok(false);
        }
        Err(SyncError::Os {
            op: "sem_unlink",
            name: name.to_owned(),
            source: err,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increments the count, waking one waiter.
    pub fn post(&self) -> Result<(), SyncError> {
        // SAFETY: `self.sem` is open until drop.
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(self.os_error("sem_post", io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Waits for the count to become positive and decrements it.
    ///
    /// Returns `false` if `timeout` expired first, in which case the count is
    /// untouched. `None` and a zero duration both block indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, SyncError> {
        let result = match timeout {
            None => wait_forever(self.sem).map(|()| true),
            Some(t) if t.is_zero() => wait_forever(self.sem).map(|()| true),
            Some(t) => imp::wait_timeout(self.sem, t),
        };
        result.map_err(|e| self.os_error("sem_wait", e))
    }

    /// Decrements the count if it is positive, without blocking.
    pub fn try_wait(&self) -> Result<bool, SyncError> {
        try_wait_raw(self.sem).map_err(|e| self.os_error("sem_trywait", e))
    }

    fn os_error(&self, op: &'static str, source: io::Error) -> SyncError {
        SyncError::Os {
            op,
            name: self.name.clone(),
            source,
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: the handle is open and closed exactly once here.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn test_name(label: &str) -> String {
        format!("/tsem-{}-{label}", std::process::id())
    }

    #[test]
    fn counts_every_post() {
        let name = test_name("count");
        let sem = NamedSemaphore::create_or_open(&name).unwrap();
        for _ in 0..3 {
            sem.post().unwrap();
        }
        for _ in 0..3 {
            assert!(sem.try_wait().unwrap());
        }
        assert!(!sem.try_wait().unwrap());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn timeout_expires_without_consuming() {
        let name = test_name("timeout");
        let sem = NamedSemaphore::create_or_open(&name).unwrap();

        let start = Instant::now();
        assert!(!sem.wait(Some(Duration::from_millis(50))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));

        sem.post().unwrap();
        assert!(sem.wait(Some(Duration::from_millis(50))).unwrap());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn handles_with_the_same_name_share_the_count() {
        let name = test_name("shared");
        let a = NamedSemaphore::create_or_open(&name).unwrap();
        let b = NamedSemaphore::create_or_open(&name).unwrap();
        a.post().unwrap();
        assert!(b.try_wait().unwrap());
        assert!(!a.try_wait().unwrap());
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn blocking_wait_wakes_on_post() {
        let name = test_name("wake");
        let sem = NamedSemaphore::create_or_open(&name).unwrap();
        let poster = NamedSemaphore::create_or_open(&name).unwrap();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            poster.post().unwrap();
        });
        assert!(sem.wait(None).unwrap());
        t.join().unwrap();
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn unlink_of_missing_name_is_not_an_error() {
        assert!(!NamedSemaphore::unlink(&test_name("missing")).unwrap());
    }

    #[test]
    fn names_must_be_rooted() {
        assert!(matches!(
            NamedSemaphore::create_or_open("no-slash"),
            Err(SyncError::InvalidName(_))
        ));
    }
}
