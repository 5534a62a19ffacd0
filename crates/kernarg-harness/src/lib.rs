//! Consumer side of the kernel-argument handoff.
//!
//! [`Orchestrator::run`] spawns the traced binary with the tracer injected, waits on the
//! completion pipe and exchange file, copies every captured pointer argument out of device
//! memory, and finally releases the producer. The remaining modules cover the steps around a
//! session: the argument-layout header the tracer is compiled against, the cmake build, and the
//! comparison of result sets from several variants of the same program.

pub mod compare;
pub mod config;
mod error;
pub mod header;
pub mod job;
mod orchestrator;
mod producer;
mod session;
pub mod toolchain;
mod verify;

pub use compare::{allclose, compare_results, ArgumentComparison, Tolerance};
pub use config::{ConfigError, SessionConfig, Tunables};
pub use error::{HandoffError, ToolError};
pub use header::{render_header, write_header, DEFAULT_HEADER_PATH};
pub use job::VerifyJob;
pub use orchestrator::{ArgumentBuffer, HandoffReport, HandoffState, Orchestrator, ResultSet};
pub use producer::{
    Producer, ProducerExit, ENV_IPC_OUTPUT_FILE, ENV_KERNEL_TO_TRACE, ENV_LOG_LEVEL,
    ENV_PIPE_NAME, ENV_TOOLS_LIB,
};
pub use session::ChannelPaths;
pub use verify::{run_job, VariantComparison, VerifyOutcome};
