//! Bidirectional master/slave channel over shared memory.
//!
//! Two processes open an [`IpcChannel`] with the same base name and channel
//! number but opposite [`Role`]s. Each direction of traffic has its own data
//! segment, mutex and counting semaphore; a small control segment records the
//! authoritative capacity of both data segments so a reader can tell when the
//! writer has regrown its segment and must re-attach.
//!
//! A message replaces the previous contents of its segment. The semaphore is
//! posted once per send, so a slow receiver wakes once per send but can only
//! ever read the most recent payload.

mod channel;
mod control;
mod error;
mod growth;
mod naming;
mod segment;
mod shm_layout;

pub use channel::{
    ChannelOptions, DEFAULT_ATTACH_TIMEOUT, DEFAULT_INITIAL_CAPACITY, IpcChannel, SendGuard,
};
pub use error::ChannelError;
pub use growth::grown_capacity;
pub use naming::{ChannelNames, Direction, MAX_NAME_LEN, NamingError, Role};
pub use tandem_perf_recorder::{PerfRecorder, PerfStage};
