use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// A captured pointer argument has no entry in the element-width table.
    #[error("unsupported pointer type: {0}")]
    UnsupportedPointerType(String),

    #[error("allocation of {size} bytes is not a multiple of the {width}-byte element size")]
    SizeMismatch { size: u64, width: usize },

    #[error("received {records} IPC handles for {args} pointer arguments")]
    ArityMismatch { records: usize, args: usize },

    #[error("allocation of {0} bytes does not fit in host memory")]
    TooLarge(u64),

    #[error("failed to load device runtime: {0}")]
    Load(String),

    #[error("{call} failed with status {status}: {message}")]
    Runtime {
        call: &'static str,
        status: i32,
        message: String,
    },

    #[error("IPC handle is not known to the backend")]
    InvalidHandle,

    #[error("IPC handle is already open in this process")]
    AlreadyOpen,

    #[error("device pointer {0:#x} is not open")]
    NotOpen(u64),

    #[error("copy of {len} bytes exceeds the {capacity}-byte allocation")]
    OutOfBounds { len: usize, capacity: usize },
}
