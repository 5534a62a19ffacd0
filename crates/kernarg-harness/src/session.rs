use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::HandoffError;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-session filesystem endpoints shared with the producer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelPaths {
    /// Completion pipe (`NEXUS_PIPE_NAME`).
    pub pipe: PathBuf,
    /// Append-only exchange file (`NEXUS_IPC_OUTPUT_FILE`).
    pub exchange: PathBuf,
}

impl ChannelPaths {
    /// `kernel_pipe_<suffix>` and `ipc_handle_<suffix>.bin` under `dir`. The suffix combines the
    /// wall clock, the harness pid and a counter, so sessions started back to back differ.
    pub fn for_session(dir: &Path) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        let suffix = format!("{nanos}_{}_{seq}", std::process::id());
        Self {
            pipe: dir.join(format!("kernel_pipe_{suffix}")),
            exchange: dir.join(format!("ipc_handle_{suffix}.bin")),
        }
    }

    /// Removes leftovers from an earlier run so the reader never sees stale records.
    pub fn clear(&self) -> Result<(), HandoffError> {
        for path in [&self.exchange, &self.pipe] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("removed stale {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(HandoffError::ChannelSetup {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Best-effort removal once the session is over.
    pub fn remove(&self) {
        for path in [&self.exchange, &self.pipe] {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove {}: {err}", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_to_back_sessions_get_distinct_paths() {
        let dir = Path::new("/tmp");
        let a = ChannelPaths::for_session(dir);
        let b = ChannelPaths::for_session(dir);
        assert_ne!(a.pipe, b.pipe);
        assert_ne!(a.exchange, b.exchange);

        let pipe_name = a.pipe.file_name().unwrap().to_str().unwrap();
        assert!(pipe_name.starts_with("kernel_pipe_"));
        let exchange_name = a.exchange.file_name().unwrap().to_str().unwrap();
        assert!(exchange_name.starts_with("ipc_handle_") && exchange_name.ends_with(".bin"));
    }

    #[test]
    fn clear_removes_stale_files_and_tolerates_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ChannelPaths::for_session(dir.path());
        std::fs::write(&paths.exchange, b"BEGIN\nstale").unwrap();

        paths.clear().unwrap();
        assert!(!paths.exchange.exists());
        paths.clear().unwrap();
    }
}
