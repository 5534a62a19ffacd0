use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::HandoffError;
use crate::session::ChannelPaths;

/// Environment contract understood by the tracer library.
pub const ENV_TOOLS_LIB: &str = "HSA_TOOLS_LIB";
pub const ENV_KERNEL_TO_TRACE: &str = "KERNEL_TO_TRACE";
pub const ENV_LOG_LEVEL: &str = "NEXUS_LOG_LEVEL";
pub const ENV_PIPE_NAME: &str = "NEXUS_PIPE_NAME";
pub const ENV_IPC_OUTPUT_FILE: &str = "NEXUS_IPC_OUTPUT_FILE";

/// How the traced process terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerExit {
    Exited { code: i32 },
    Signaled { signal: i32 },
}

impl ProducerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited { code },
            (None, Some(signal)) => Self::Signaled { signal },
            // Stopped/continued statuses are not reported by `wait` without WUNTRACED.
            (None, None) => Self::Exited { code: -1 },
        }
    }

    pub fn success(self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

impl fmt::Display for ProducerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal } => match Signal::try_from(signal) {
                Ok(name) => write!(f, "was terminated by signal {signal} ({name})"),
                Err(_) => write!(f, "was terminated by signal {signal}"),
            },
        }
    }
}

/// The traced binary, running with the tracer injected.
#[derive(Debug)]
pub struct Producer {
    child: Child,
    binary: PathBuf,
}

impl Producer {
    /// Starts the traced binary without waiting for it. The harness environment is inherited;
    /// the protocol variables are layered on top, followed by `config.extra_env`.
    pub fn spawn(config: &SessionConfig, paths: &ChannelPaths) -> Result<Self, HandoffError> {
        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.binary_args)
            .env(ENV_TOOLS_LIB, &config.tracer_lib)
            .env(ENV_KERNEL_TO_TRACE, &config.kernel)
            .env(ENV_LOG_LEVEL, config.tracer_log_level.to_string())
            .env(ENV_PIPE_NAME, &paths.pipe)
            .env(ENV_IPC_OUTPUT_FILE, &paths.exchange)
            .envs(config.extra_env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut attempts = 0u32;
        let child = loop {
            match cmd.spawn() {
                Ok(child) => break child,
                // A freshly written producer script can still be open for writing elsewhere.
                Err(err) if err.raw_os_error() == Some(nix::libc::ETXTBSY) && attempts < 3 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempts)));
                }
                Err(source) => {
                    return Err(HandoffError::Spawn {
                        binary: config.binary.clone(),
                        source,
                    })
                }
            }
        };
        tracing::debug!(pid = child.id(), binary = %config.binary.display(), "spawned producer");
        Ok(Self {
            child,
            binary: config.binary.clone(),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn try_exit(&mut self) -> io::Result<Option<ProducerExit>> {
        Ok(self.child.try_wait()?.map(ProducerExit::from_status))
    }

    pub fn wait(mut self) -> io::Result<ProducerExit> {
        let exit = ProducerExit::from_status(self.child.wait()?);
        tracing::debug!(binary = %self.binary.display(), "producer {exit}");
        Ok(exit)
    }

    /// Kills and reaps the producer. A producer that already exited is only reaped.
    pub fn kill(mut self) -> io::Result<ProducerExit> {
        if let Some(exit) = self.try_exit()? {
            return Ok(exit);
        }
        if let Err(err) = self.child.kill() {
            tracing::warn!(pid = self.child.id(), "failed to kill producer: {err}");
        }
        self.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_exit_codes_and_signals() {
        assert_eq!(
            ProducerExit::from_status(ExitStatus::from_raw(3 << 8)),
            ProducerExit::Exited { code: 3 }
        );
        assert_eq!(
            ProducerExit::from_status(ExitStatus::from_raw(9)),
            ProducerExit::Signaled { signal: 9 }
        );
        assert!(ProducerExit::Exited { code: 0 }.success());
        assert!(!ProducerExit::Signaled { signal: 11 }.success());
    }

    #[test]
    fn display_names_the_signal() {
        assert_eq!(
            ProducerExit::Signaled { signal: 11 }.to_string(),
            "was terminated by signal 11 (SIGSEGV)"
        );
        assert_eq!(
            ProducerExit::Exited { code: 2 }.to_string(),
            "exited with code 2"
        );
    }
}
