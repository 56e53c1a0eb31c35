use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("cannot create or open '{name}'")]
    ResourceUnavailable {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid primitive name '{0}'")]
    InvalidName(String),

    #[error("{op} on '{name}' failed")]
    Os {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
}
