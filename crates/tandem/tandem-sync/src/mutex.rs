use std::cell::UnsafeCell;
use std::io;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;

/// A pthread mutex that can be shared between processes.
///
/// The value must be initialised in place with [`ProcessMutex::init_at`]
/// inside memory every participant maps; it is never moved afterwards.
#[repr(C)]
pub struct ProcessMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: pthread mutexes are designed for concurrent use through shared
// references; PTHREAD_PROCESS_SHARED extends that across processes.
unsafe impl Sync for ProcessMutex {}
unsafe impl Send for ProcessMutex {}

/// Holds a [`ProcessMutex`] until dropped.
///
/// Not `Send`: a pthread mutex must be released by the thread that locked it.
pub struct ProcessMutexGuard<'a> {
    mutex: &'a ProcessMutex,
    _not_send: PhantomData<*const ()>,
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

impl ProcessMutex {
    /// Initialises a process-shared mutex at `this`.
    ///
    /// # Safety
    /// `this` must be valid for writes, suitably aligned, and no other thread
    /// or process may touch the mutex until this returns. Calling it on a
    /// mutex somebody holds is undefined behavior.
    pub unsafe fn init_at(this: *mut ProcessMutex) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is written by pthread_mutexattr_init before any use and
        // destroyed exactly once below; `this` is valid per the contract.
        unsafe {
            check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let result = check(libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|()| {
                let raw = UnsafeCell::raw_get(ptr::addr_of!((*this).raw));
                check(libc::pthread_mutex_init(raw, attr.as_ptr()))
            });
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    /// Blocks until the mutex is acquired.
    pub fn lock(&self) -> io::Result<ProcessMutexGuard<'_>> {
        // SAFETY: the mutex was initialised by `init_at` before being shared.
        check(unsafe { libc::pthread_mutex_lock(self.raw.get()) })?;
        Ok(ProcessMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// Acquires the mutex if it is free, `None` if somebody holds it.
    pub fn try_lock(&self) -> io::Result<Option<ProcessMutexGuard<'_>>> {
        // SAFETY: see `lock`.
        match unsafe { libc::pthread_mutex_trylock(self.raw.get()) } {
            0 => Ok(Some(ProcessMutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })),
            libc::EBUSY => Ok(None),
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

impl Drop for ProcessMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while this thread holds the mutex.
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn boxed_mutex() -> Box<ProcessMutex> {
        let mut slot = Box::new(MaybeUninit::<ProcessMutex>::uninit());
        unsafe {
            ProcessMutex::init_at(slot.as_mut_ptr()).unwrap();
            Box::from_raw(Box::into_raw(slot) as *mut ProcessMutex)
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        let m = boxed_mutex();
        {
            let _g = m.lock().unwrap();
            assert!(m.try_lock().unwrap().is_none());
        }
        assert!(m.try_lock().unwrap().is_some());
    }

    #[test]
    fn serializes_threads() {
        let m: Arc<ProcessMutex> = Arc::from(boxed_mutex());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let _g = m.lock().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
