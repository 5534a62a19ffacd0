use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The exchange file did not reach the expected number of distinct handles in time.
    #[error("timed out after {waited:?} waiting for IPC handles ({received} of {expected} received)")]
    Timeout {
        expected: usize,
        received: usize,
        waited: Duration,
    },

    /// No peer opened the other end of the completion pipe in time.
    #[error("timed out after {waited:?} waiting for a peer on pipe {}", path.display())]
    PipeTimeout { path: PathBuf, waited: Duration },

    #[error("{} exists but is not a named pipe", path.display())]
    NotAPipe { path: PathBuf },

    #[error("pipe rendezvous thread for {} exited without a result", path.display())]
    RendezvousLost { path: PathBuf },
}

impl ChannelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
