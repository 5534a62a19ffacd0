use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use kernarg_channel::ChannelError;
use kernarg_device::DeviceError;
use thiserror::Error;

use crate::producer::ProducerExit;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to prepare {}: {source}", path.display())]
    ChannelSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn producer {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for producer: {0}")]
    Wait(#[source] io::Error),

    /// The producer terminated before the harness released it, so its kernel arguments were
    /// never (fully) published.
    #[error("producer {0} before publishing all kernel arguments")]
    ProducerExitedEarly(ProducerExit),
}

/// Failures of the sequential helpers around the handoff: header, build, job files and the
/// variant runs of a job.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid job file {}: {source}", path.display())]
    Job {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("job file {} lists no variants", path.display())]
    NoVariants { path: PathBuf },

    #[error("job file needs `tracer_lib` or `tracer_dir`")]
    NoTracer,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("variant {variant}: {source}")]
    Handoff {
        variant: String,
        #[source]
        source: HandoffError,
    },

    #[error("{program} failed with {status}\n{stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}
