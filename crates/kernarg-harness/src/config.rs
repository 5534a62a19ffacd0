use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use kernarg_channel::DEFAULT_POLL_INTERVAL;
use kernarg_device::ArgSignature;

/// Verbosity passed to the tracer through `NEXUS_LOG_LEVEL`.
pub const DEFAULT_TRACER_LOG_LEVEL: u8 = 3;
pub const DEFAULT_CHANNEL_DIR: &str = "/tmp";

pub const ENV_CHANNEL_DIR: &str = "KERNARG_CHANNEL_DIR";
pub const ENV_POLL_INTERVAL_MS: &str = "KERNARG_POLL_INTERVAL_MS";
pub const ENV_HANDLE_TIMEOUT_SECS: &str = "KERNARG_HANDLE_TIMEOUT_SECS";
pub const ENV_PIPE_TIMEOUT_SECS: &str = "KERNARG_PIPE_TIMEOUT_SECS";

/// Everything one handoff needs. A fresh value is built per traced binary; nothing is shared
/// between sessions.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Traced binary and its arguments.
    pub binary: PathBuf,
    pub binary_args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    /// Kernel name (or substring) the tracer should capture.
    pub kernel: String,
    pub signature: ArgSignature,
    /// Instrumentation library injected through `HSA_TOOLS_LIB`.
    pub tracer_lib: PathBuf,
    pub tracer_log_level: u8,
    /// Directory holding the per-session pipe and exchange file.
    pub channel_dir: PathBuf,
    pub poll_interval: Duration,
    /// Upper bound on the wait for all IPC handles; `None` waits forever.
    pub handle_timeout: Option<Duration>,
    /// Upper bound on each completion-pipe open; `None` waits forever.
    pub pipe_timeout: Option<Duration>,
    /// Leave the pipe and exchange file in place after a successful session.
    pub keep_channel: bool,
    /// Additional environment for the producer, applied after the protocol variables.
    pub extra_env: Vec<(OsString, OsString)>,
}

impl SessionConfig {
    pub fn new(
        binary: impl Into<PathBuf>,
        kernel: impl Into<String>,
        signature: ArgSignature,
        tracer_lib: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            binary_args: Vec::new(),
            working_dir: None,
            kernel: kernel.into(),
            signature,
            tracer_lib: tracer_lib.into(),
            tracer_log_level: DEFAULT_TRACER_LOG_LEVEL,
            channel_dir: PathBuf::from(DEFAULT_CHANNEL_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            handle_timeout: None,
            pipe_timeout: None,
            keep_channel: false,
            extra_env: Vec::new(),
        }
    }

    /// Overrides defaults with any tunables that are set.
    pub fn with_tunables(mut self, tunables: &Tunables) -> Self {
        if let Some(dir) = &tunables.channel_dir {
            self.channel_dir = dir.clone();
        }
        if let Some(interval) = tunables.poll_interval {
            self.poll_interval = interval;
        }
        if tunables.handle_timeout.is_some() {
            self.handle_timeout = tunables.handle_timeout;
        }
        if tunables.pipe_timeout.is_some() {
            self.pipe_timeout = tunables.pipe_timeout;
        }
        self
    }
}

/// Session knobs that may come from the environment rather than the command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tunables {
    pub channel_dir: Option<PathBuf>,
    pub poll_interval: Option<Duration>,
    pub handle_timeout: Option<Duration>,
    pub pipe_timeout: Option<Duration>,
}

impl Tunables {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnv(var)),
            }
        };

        let poll_interval = match number(ENV_POLL_INTERVAL_MS)? {
            Some(0) => return Err(ConfigError::InvalidEnv(ENV_POLL_INTERVAL_MS)),
            other => other.map(Duration::from_millis),
        };

        Ok(Self {
            channel_dir: lookup(ENV_CHANNEL_DIR)
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            poll_interval,
            handle_timeout: number(ENV_HANDLE_TIMEOUT_SECS)?.map(Duration::from_secs),
            pipe_timeout: number(ENV_PIPE_TIMEOUT_SECS)?.map(Duration::from_secs),
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidEnv(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnv(var) => write!(f, "invalid value for env var {var}"),
        }
    }
}

impl std::error::Error for ConfigError {}
