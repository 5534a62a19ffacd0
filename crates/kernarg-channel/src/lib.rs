//! Host side of the kernel-argument handoff channel.
//!
//! The traced process (the producer) appends framed IPC handle records to an exchange file and
//! then blocks on a named pipe. This crate reads those records back, performs the pipe
//! rendezvous, and writes the single release token. The wire format is defined in [`format`].

pub mod format;
mod error;
mod pipe;
mod reader;

pub use error::{ChannelError, Result};
pub use format::{encode_frame, scan, ExchangeRecord, IpcHandle, Scan, ScanDiagnostics};
pub use pipe::{ensure_pipe, CompletionSignaler, PipeRendezvous, RendezvousGuard, RELEASE_TOKEN};
pub use reader::{CollectedRecords, FrameReader, DEFAULT_POLL_INTERVAL};
