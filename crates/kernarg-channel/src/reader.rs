use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ChannelError, Result};
use crate::format::{scan, ExchangeRecord, Scan, ScanDiagnostics};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Records handed back once the exchange file holds enough distinct handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedRecords {
    /// Exactly `expected` records, in first-seen order.
    pub records: Vec<ExchangeRecord>,
    /// Diagnostics from the scan that satisfied the wait.
    pub diagnostics: ScanDiagnostics,
    /// Distinct handles present beyond `expected`; they are not returned.
    pub surplus: usize,
    pub polls: u32,
}

/// Polls an append-only exchange file until `expected` distinct records are present.
///
/// Every poll re-reads the file from the start; no offset is kept between polls, so records
/// written in any order or interleaved with garbage are picked up as soon as they are complete.
#[derive(Clone, Debug)]
pub struct FrameReader {
    path: PathBuf,
    expected: usize,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl FrameReader {
    pub fn new(path: impl Into<PathBuf>, expected: usize) -> Self {
        Self {
            path: path.into(),
            expected,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Reads and parses the file once. Returns `None` while the file does not exist.
    pub fn scan_once(&self) -> Result<Option<Scan>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(scan(&data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ChannelError::io(&self.path, err)),
        }
    }

    pub fn collect(&self) -> Result<CollectedRecords> {
        self.collect_while(|| Ok(()))
    }

    /// Like [`FrameReader::collect`], but calls `check` once per poll cycle before sleeping.
    /// An error from `check` aborts the wait and is returned unchanged.
    pub fn collect_while<E, F>(&self, mut check: F) -> std::result::Result<CollectedRecords, E>
    where
        E: From<ChannelError>,
        F: FnMut() -> std::result::Result<(), E>,
    {
        let start = Instant::now();
        let mut polls = 0u32;
        let mut logged = 0usize;
        let mut last_malformed = 0usize;

        if self.expected == 0 {
            return Ok(CollectedRecords {
                records: Vec::new(),
                diagnostics: ScanDiagnostics::default(),
                surplus: 0,
                polls,
            });
        }

        loop {
            polls += 1;
            let received = match self.scan_once()? {
                None => {
                    tracing::debug!(path = %self.path.display(), "waiting for IPC file");
                    0
                }
                Some(scan) => {
                    for record in scan.records.iter().skip(logged) {
                        tracing::debug!("IPC handle (hex):\n{}", record.handle);
                        tracing::debug!("corresponding pointer size: {} bytes", record.size);
                    }
                    logged = logged.max(scan.records.len());

                    if scan.diagnostics.malformed > last_malformed {
                        tracing::warn!(
                            path = %self.path.display(),
                            malformed = scan.diagnostics.malformed,
                            "discarding malformed exchange segments"
                        );
                        last_malformed = scan.diagnostics.malformed;
                    }

                    if scan.records.len() >= self.expected {
                        return Ok(self.finish(scan, polls));
                    }
                    scan.records.len()
                }
            };

            tracing::debug!("waiting for {} more IPC handles", self.expected - received);
            if let Err(err) = check() {
                // The writer may have finished between the scan above and the check.
                if let Some(scan) = self.scan_once()? {
                    if scan.records.len() >= self.expected {
                        return Ok(self.finish(scan, polls));
                    }
                }
                return Err(err);
            }

            let waited = start.elapsed();
            let sleep_for = match self.timeout {
                Some(timeout) if waited >= timeout => {
                    return Err(ChannelError::Timeout {
                        expected: self.expected,
                        received,
                        waited,
                    }
                    .into());
                }
                Some(timeout) => self.poll_interval.min(timeout - waited),
                None => self.poll_interval,
            };
            thread::sleep(sleep_for);
        }
    }

    fn finish(&self, mut scan: Scan, polls: u32) -> CollectedRecords {
        let surplus = scan.records.len() - self.expected;
        if surplus > 0 {
            tracing::warn!(
                expected = self.expected,
                surplus,
                "exchange file holds more distinct handles than pointer arguments; ignoring the rest"
            );
            scan.records.truncate(self.expected);
        }
        tracing::debug!("successfully read {} IPC handles and sizes", scan.records.len());
        CollectedRecords {
            records: scan.records,
            diagnostics: scan.diagnostics,
            surplus,
            polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_frame, IpcHandle, IPC_HANDLE_SIZE};

    fn record(fill: u8, size: u64) -> ExchangeRecord {
        ExchangeRecord {
            handle: IpcHandle::from_bytes([fill; IPC_HANDLE_SIZE]),
            size,
        }
    }

    #[test]
    fn zero_expected_returns_without_touching_the_file() {
        let reader = FrameReader::new("/nonexistent/kernarg/exchange.bin", 0);
        let out = reader.collect().unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.polls, 0);
    }

    #[test]
    fn missing_file_scans_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FrameReader::new(dir.path().join("missing.bin"), 1);
        assert!(reader.scan_once().unwrap().is_none());
    }

    #[test]
    fn surplus_records_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.bin");
        let mut data = encode_frame(&record(1, 4));
        data.extend(encode_frame(&record(2, 4)));
        data.extend(encode_frame(&record(3, 4)));
        std::fs::write(&path, data).unwrap();

        let out = FrameReader::new(&path, 2).collect().unwrap();
        assert_eq!(out.records, vec![record(1, 4), record(2, 4)]);
        assert_eq!(out.surplus, 1);
        assert_eq!(out.polls, 1);
    }

    #[test]
    fn check_error_aborts_the_wait() {
        #[derive(Debug)]
        enum Abort {
            Check,
            Channel,
        }
        impl From<ChannelError> for Abort {
            fn from(_: ChannelError) -> Self {
                Abort::Channel
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let reader = FrameReader::new(dir.path().join("never.bin"), 1)
            .with_poll_interval(Duration::from_millis(1));
        let mut calls = 0;
        let err = reader
            .collect_while(|| {
                calls += 1;
                if calls == 3 {
                    Err(Abort::Check)
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, Abort::Check));
        assert_eq!(calls, 3);
    }

    #[test]
    fn records_completed_before_a_failed_check_are_still_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.bin");
        std::fs::write(&path, encode_frame(&record(1, 8))).unwrap();

        let reader = FrameReader::new(&path, 2).with_poll_interval(Duration::from_millis(1));
        let out = reader
            .collect_while(|| {
                // The writer publishes its last record and exits.
                let mut data = encode_frame(&record(1, 8));
                data.extend(encode_frame(&record(2, 8)));
                std::fs::write(&path, data).unwrap();
                Err(ChannelError::RendezvousLost { path: path.clone() })
            })
            .unwrap();
        assert_eq!(out.records, vec![record(1, 8), record(2, 8)]);
    }
}
