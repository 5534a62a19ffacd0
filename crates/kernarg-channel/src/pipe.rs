use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::error::{ChannelError, Result};
use crate::reader::DEFAULT_POLL_INTERVAL;

/// The single line written to release the producer.
pub const RELEASE_TOKEN: &[u8] = b"done\n";

/// Creates the named pipe at `path` unless it already exists. Returns `true` when it was created.
///
/// Permissions are set to 0o777 after creation, independent of the umask.
pub fn ensure_pipe(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(false),
        Ok(_) => {
            return Err(ChannelError::NotAPipe {
                path: path.to_path_buf(),
            })
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(ChannelError::io(path, err)),
    }

    match mkfifo(path, Mode::S_IRWXU | Mode::S_IRWXG | Mode::S_IRWXO) {
        Ok(()) => {}
        // The producer creates the same pipe on startup; losing that race is fine.
        Err(Errno::EEXIST) => return ensure_pipe(path),
        Err(errno) => return Err(ChannelError::io(path, errno.into())),
    }
    fs::set_permissions(path, Permissions::from_mode(0o777))
        .map_err(|err| ChannelError::io(path, err))?;
    tracing::debug!(path = %path.display(), "created completion pipe");
    Ok(true)
}

/// Opens the write end without blocking. Fails with `ENXIO` while no reader has the pipe open.
fn open_write_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
}

fn is_no_reader(err: &io::Error) -> bool {
    err.raw_os_error() == Some(Errno::ENXIO as i32)
}

/// Waits for the producer to open the write end of the completion pipe.
///
/// Opening a FIFO for reading blocks until a writer appears. The open runs on a helper thread so
/// the wait can honor a deadline and a liveness check; on abort the helper is released by
/// briefly opening the write end ourselves.
#[derive(Clone, Debug)]
pub struct PipeRendezvous {
    path: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

/// Read end of the completion pipe, held while the exchange file is drained.
#[derive(Debug)]
pub struct RendezvousGuard {
    path: PathBuf,
    _reader: File,
}

impl RendezvousGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PipeRendezvous {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn wait(&self) -> Result<RendezvousGuard> {
        self.wait_while(|| Ok(()))
    }

    pub fn wait_while<E, F>(&self, mut check: F) -> std::result::Result<RendezvousGuard, E>
    where
        E: From<ChannelError>,
        F: FnMut() -> std::result::Result<(), E>,
    {
        ensure_pipe(&self.path)?;

        let (tx, rx) = mpsc::channel();
        let open_path = self.path.clone();
        let opener = thread::Builder::new()
            .name("kernarg-pipe-open".into())
            .spawn(move || {
                let _ = tx.send(File::open(open_path));
            })
            .map_err(|err| ChannelError::io(&self.path, err))?;

        let start = Instant::now();
        loop {
            let slice = match self.timeout {
                Some(timeout) => self
                    .poll_interval
                    .min(timeout.saturating_sub(start.elapsed())),
                None => self.poll_interval,
            };
            match rx.recv_timeout(slice) {
                Ok(Ok(reader)) => {
                    let _ = opener.join();
                    tracing::debug!(path = %self.path.display(), "producer opened completion pipe");
                    return Ok(RendezvousGuard {
                        path: self.path.clone(),
                        _reader: reader,
                    });
                }
                Ok(Err(err)) => {
                    let _ = opener.join();
                    return Err(ChannelError::io(&self.path, err).into());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ChannelError::RendezvousLost {
                        path: self.path.clone(),
                    }
                    .into());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Err(err) = check() {
                self.abandon(opener, rx);
                return Err(err);
            }
            if let Some(timeout) = self.timeout {
                let waited = start.elapsed();
                if waited >= timeout {
                    self.abandon(opener, rx);
                    return Err(ChannelError::PipeTimeout {
                        path: self.path.clone(),
                        waited,
                    }
                    .into());
                }
            }
            tracing::debug!(path = %self.path.display(), "waiting for producer to open completion pipe");
        }
    }

    fn abandon(&self, opener: JoinHandle<()>, rx: Receiver<io::Result<File>>) {
        match open_write_nonblocking(&self.path) {
            Ok(_writer) => {
                let _ = opener.join();
            }
            // The helper has not reached open(2) yet; it stays detached and exits once any
            // writer shows up.
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "could not release pipe opener: {err}");
            }
        }
        drop(rx);
    }
}

/// One-shot "consumer done" signal. [`CompletionSignaler::signal`] consumes the signaler, so a
/// session cannot release its producer twice.
#[derive(Debug)]
pub struct CompletionSignaler {
    path: PathBuf,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl CompletionSignaler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Writes [`RELEASE_TOKEN`] once a reader holds the pipe open.
    pub fn signal(self) -> Result<()> {
        self.signal_while(|| Ok(()))
    }

    /// Like [`CompletionSignaler::signal`], but calls `check` between open attempts while no
    /// reader is present. An error from `check` aborts the wait without writing the token.
    pub fn signal_while<E, F>(self, mut check: F) -> std::result::Result<(), E>
    where
        E: From<ChannelError>,
        F: FnMut() -> std::result::Result<(), E>,
    {
        ensure_pipe(&self.path)?;

        let start = Instant::now();
        let mut writer = loop {
            match open_write_nonblocking(&self.path) {
                Ok(writer) => break writer,
                Err(err) if is_no_reader(&err) => {
                    check()?;
                    let waited = start.elapsed();
                    let sleep_for = match self.timeout {
                        Some(timeout) if waited >= timeout => {
                            return Err(ChannelError::PipeTimeout {
                                path: self.path,
                                waited,
                            }
                            .into())
                        }
                        Some(timeout) => self.poll_interval.min(timeout - waited),
                        None => self.poll_interval,
                    };
                    thread::sleep(sleep_for);
                }
                Err(err) => return Err(ChannelError::io(&self.path, err).into()),
            }
        };

        writer
            .write_all(RELEASE_TOKEN)
            .and_then(|()| writer.flush())
            .map_err(|err| ChannelError::io(&self.path, err))?;
        tracing::debug!(path = %self.path.display(), "sent release token");
        Ok(())
    }
}
