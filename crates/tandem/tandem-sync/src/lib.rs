//! Process-shared synchronization primitives.
//!
//! - [`ProcessMutex`]: a pthread mutex initialised with
//!   `PTHREAD_PROCESS_SHARED`, meant to live inside a shared mapping.
//! - [`NamedSemaphore`]: a POSIX named counting semaphore with a blocking,
//!   timeout-capable `wait`.
//!
//! The timed wait is backed by `sem_timedwait` where the platform has it and
//! by a back-off poll of `sem_trywait` on Apple targets, which do not. Callers
//! see the same blocking contract either way.

#[cfg(not(unix))]
compile_error!("tandem-sync supports unix targets only");

mod error;
mod mutex;
mod semaphore;

pub use error::SyncError;
pub use mutex::{ProcessMutex, ProcessMutexGuard};
pub use semaphore::NamedSemaphore;
