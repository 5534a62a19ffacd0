//! Exchange-file wire format.
//!
//! The producer appends one frame per captured pointer argument:
//!
//! ```text
//! b"BEGIN\n" | handle: [u8; 64] | size: u64 (LE, bytes) | b"END\n"
//! ```
//!
//! There is no header, count prefix, or checksum. The file is append-only and may be observed
//! mid-write, so a scan must tolerate truncated or malformed segments and only accept payloads of
//! exactly [`RECORD_PAYLOAD_SIZE`] bytes.

use std::collections::HashSet;
use std::fmt;

pub const FRAME_BEGIN: &[u8] = b"BEGIN\n";
pub const FRAME_END: &[u8] = b"END\n";

/// Size of an opaque device-memory IPC handle (`hipIpcMemHandle_t`).
pub const IPC_HANDLE_SIZE: usize = 64;
pub const SIZE_FIELD_SIZE: usize = 8;
pub const RECORD_PAYLOAD_SIZE: usize = IPC_HANDLE_SIZE + SIZE_FIELD_SIZE;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpcHandle([u8; IPC_HANDLE_SIZE]);

impl IpcHandle {
    pub const fn from_bytes(bytes: [u8; IPC_HANDLE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IPC_HANDLE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IpcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpcHandle(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Hex dump in rows of 16 bytes, matching the tracer's own log output.
impl fmt::Display for IpcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row_index, row) in self.0.chunks(16).enumerate() {
            if row_index > 0 {
                writeln!(f)?;
            }
            for (i, b) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{b:02x}")?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub handle: IpcHandle,
    /// Size of the referenced device allocation, in bytes.
    pub size: u64,
}

impl ExchangeRecord {
    fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != RECORD_PAYLOAD_SIZE {
            return None;
        }
        let (handle, size) = payload.split_at(IPC_HANDLE_SIZE);
        Some(Self {
            handle: IpcHandle(handle.try_into().ok()?),
            size: u64::from_le_bytes(size.try_into().ok()?),
        })
    }
}

/// Encodes one frame exactly as the producer writes it.
pub fn encode_frame(record: &ExchangeRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_BEGIN.len() + RECORD_PAYLOAD_SIZE + FRAME_END.len());
    out.extend_from_slice(FRAME_BEGIN);
    out.extend_from_slice(record.handle.as_bytes());
    out.extend_from_slice(&record.size.to_le_bytes());
    out.extend_from_slice(FRAME_END);
    out
}

/// Counters describing one pass over the exchange file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanDiagnostics {
    /// Number of `BEGIN` delimiters seen.
    pub segments: usize,
    /// Segments that can no longer become a valid record.
    pub malformed: usize,
    /// Well-formed records whose handle was already seen earlier in the file.
    pub duplicates: usize,
    /// The last segment is not terminated yet (producer likely mid-write).
    pub pending_tail: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scan {
    /// Distinct records in first-seen order.
    pub records: Vec<ExchangeRecord>,
    pub diagnostics: ScanDiagnostics,
}

/// Parses the whole exchange file content.
///
/// The content is split on `BEGIN\n`; each chunk that contains `END\n` contributes the bytes
/// before its first `END\n`, which become a record only when exactly 72 bytes long. Records are
/// deduplicated by handle bytes, keeping the first occurrence (and its size).
pub fn scan(data: &[u8]) -> Scan {
    let mut out = Scan::default();
    let mut seen = HashSet::new();

    let chunks: Vec<&[u8]> = split_on(data, FRAME_BEGIN).collect();
    out.diagnostics.segments = chunks.len() - 1;
    let last = chunks.len() - 1;

    for (index, chunk) in chunks.iter().enumerate() {
        let Some(end) = find_subslice(chunk, FRAME_END) else {
            if index == last {
                out.diagnostics.pending_tail = !(index == 0 && chunk.is_empty());
            } else if index > 0 || !chunk.is_empty() {
                out.diagnostics.malformed += 1;
            }
            continue;
        };

        let Some(record) = ExchangeRecord::from_payload(&chunk[..end]) else {
            out.diagnostics.malformed += 1;
            continue;
        };

        if seen.insert(record.handle) {
            out.records.push(record);
        } else {
            out.diagnostics.duplicates += 1;
        }
    }

    out
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Byte-slice equivalent of `str::split` for a multi-byte delimiter. Always yields at least one
/// chunk.
fn split_on<'a>(data: &'a [u8], delim: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match find_subslice(current, delim) {
            Some(pos) => {
                rest = Some(&current[pos + delim.len()..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}
