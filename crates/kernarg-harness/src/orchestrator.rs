//! Sequencing of one handoff session.
//!
//! ```text
//! INIT -> CHANNEL_CLEAR -> PRODUCER_SPAWNED -> HANDLES_COLLECTED -> BUFFERS_COPIED
//!      -> RELEASE_SENT -> PRODUCER_EXITED -> DONE
//! ```
//!
//! Every device copy finishes before the release token is written: the opened pointers alias
//! allocations the producer frees once released.

use std::fmt;

use kernarg_channel::{CompletionSignaler, FrameReader, PipeRendezvous, ScanDiagnostics};
use kernarg_device::{DeviceBackend, DevicePointerResolver, HostBuffer, PointerArg};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::HandoffError;
use crate::producer::{Producer, ProducerExit};
use crate::session::ChannelPaths;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffState {
    Init,
    ChannelClear,
    ProducerSpawned,
    HandlesCollected,
    BuffersCopied,
    ReleaseSent,
    ProducerExited,
    Done,
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::ChannelClear => "CHANNEL_CLEAR",
            Self::ProducerSpawned => "PRODUCER_SPAWNED",
            Self::HandlesCollected => "HANDLES_COLLECTED",
            Self::BuffersCopied => "BUFFERS_COPIED",
            Self::ReleaseSent => "RELEASE_SENT",
            Self::ProducerExited => "PRODUCER_EXITED",
            Self::Done => "DONE",
        })
    }
}

/// One captured pointer argument and its host copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgumentBuffer {
    /// Index in the kernel signature.
    pub position: usize,
    pub decl: String,
    pub buffer: HostBuffer,
}

/// Ordered host copies, one per captured pointer argument.
pub type ResultSet = Vec<ArgumentBuffer>;

/// Outcome of a completed session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandoffReport {
    pub kernel: String,
    pub results: ResultSet,
    pub exit: ProducerExit,
    pub malformed_segments: usize,
    pub duplicate_records: usize,
    pub surplus_handles: usize,
    pub channel: ChannelPaths,
}

struct Collected {
    results: ResultSet,
    diagnostics: ScanDiagnostics,
    surplus: usize,
}

/// Runs handoff sessions against a device backend.
pub struct Orchestrator<'a> {
    backend: &'a dyn DeviceBackend,
}

impl<'a> Orchestrator<'a> {
    pub fn new(backend: &'a dyn DeviceBackend) -> Self {
        Self { backend }
    }

    pub fn run(&self, config: &SessionConfig) -> Result<HandoffReport, HandoffError> {
        let span = tracing::info_span!(
            "handoff",
            kernel = %config.kernel,
            backend = self.backend.name()
        );
        let _enter = span.enter();
        enter(HandoffState::Init);

        // Unknown pointer types are configuration errors; reject them before spawning anything.
        let args = config.signature.pointer_args()?;

        let paths = ChannelPaths::for_session(&config.channel_dir);
        paths.clear()?;
        tracing::debug!(
            pipe = %paths.pipe.display(),
            exchange = %paths.exchange.display(),
            "channel cleared"
        );
        enter(HandoffState::ChannelClear);

        let mut producer = match Producer::spawn(config, &paths) {
            Ok(producer) => producer,
            Err(err) => {
                paths.remove();
                return Err(err);
            }
        };
        enter(HandoffState::ProducerSpawned);

        let collected = match self.collect_and_release(config, &paths, &args, &mut producer) {
            Ok(collected) => collected,
            Err(err) => {
                match producer.kill() {
                    Ok(exit) => tracing::warn!("handoff aborted; producer {exit}"),
                    Err(wait_err) => tracing::warn!("handoff aborted; reaping producer failed: {wait_err}"),
                }
                paths.remove();
                return Err(err);
            }
        };

        let exit = producer.wait().map_err(HandoffError::Wait)?;
        match exit {
            ProducerExit::Exited { code: 0 } => tracing::info!("producer {exit}"),
            _ => tracing::warn!("producer {exit}"),
        }
        enter(HandoffState::ProducerExited);

        if !config.keep_channel {
            paths.remove();
        }
        enter(HandoffState::Done);

        Ok(HandoffReport {
            kernel: config.kernel.clone(),
            results: collected.results,
            exit,
            malformed_segments: collected.diagnostics.malformed,
            duplicate_records: collected.diagnostics.duplicates,
            surplus_handles: collected.surplus,
            channel: paths,
        })
    }

    fn collect_and_release(
        &self,
        config: &SessionConfig,
        paths: &ChannelPaths,
        args: &[PointerArg],
        producer: &mut Producer,
    ) -> Result<Collected, HandoffError> {
        let mut producer_alive = || match producer.try_exit() {
            Ok(None) => Ok(()),
            Ok(Some(exit)) => Err(HandoffError::ProducerExitedEarly(exit)),
            Err(err) => Err(HandoffError::Wait(err)),
        };

        let rendezvous = PipeRendezvous::new(&paths.pipe)
            .with_poll_interval(config.poll_interval)
            .with_timeout(config.pipe_timeout)
            .wait_while(&mut producer_alive)?;

        let collected = FrameReader::new(&paths.exchange, args.len())
            .with_poll_interval(config.poll_interval)
            .with_timeout(config.handle_timeout)
            .collect_while(&mut producer_alive)?;
        // The read end only serves as the readiness signal; close it before the release so the
        // token can only be consumed by the producer.
        drop(rendezvous);
        enter(HandoffState::HandlesCollected);

        let buffers = DevicePointerResolver::new(self.backend).resolve_all(&collected.records, args)?;
        let results = args
            .iter()
            .zip(buffers)
            .map(|(arg, buffer)| ArgumentBuffer {
                position: arg.position,
                decl: arg.decl.clone(),
                buffer,
            })
            .collect();
        enter(HandoffState::BuffersCopied);

        let released = CompletionSignaler::new(&paths.pipe)
            .with_poll_interval(config.poll_interval)
            .with_timeout(config.pipe_timeout)
            .signal_while(&mut producer_alive);
        match released {
            Ok(()) => {
                tracing::info!("sent response, waiting for producer");
                enter(HandoffState::ReleaseSent);
            }
            // Copies are complete; an exit here is reported with the results.
            Err(HandoffError::ProducerExitedEarly(exit)) => {
                tracing::warn!("producer {exit} before reading the release token");
            }
            Err(err) => return Err(err),
        }

        Ok(Collected {
            results,
            diagnostics: collected.diagnostics,
            surplus: collected.surplus,
        })
    }
}

fn enter(state: HandoffState) {
    tracing::info!(%state, "handoff state");
}
