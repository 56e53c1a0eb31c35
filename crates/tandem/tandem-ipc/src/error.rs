use crate::naming::NamingError;
use std::io;
use tandem_sync::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("cannot derive channel resource names")]
    Naming(#[from] NamingError),

    #[error("failed to create or open channel resource '{resource}'")]
    Construction {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("synchronization primitive unavailable")]
    ResourceUnavailable(#[source] SyncError),

    #[error("failed to grow segment '{resource}' to {requested} bytes")]
    Growth {
        resource: String,
        requested: u64,
        #[source]
        source: io::Error,
    },

    #[error("a {len} byte message cannot fit any segment this process can map")]
    MessageTooLarge { len: u64 },

    #[error("failed to re-attach segment '{resource}' after it grew")]
    Rebind {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("segment '{resource}' is corrupt: {reason}")]
    Corrupt {
        resource: String,
        reason: &'static str,
    },

    #[error("failed to lock '{resource}'")]
    Lock {
        resource: String,
        #[source]
        source: io::Error,
    },

    #[error("semaphore operation failed")]
    Signal(#[source] SyncError),
}
