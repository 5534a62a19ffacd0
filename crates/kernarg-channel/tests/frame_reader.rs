#![cfg(not(target_arch = "wasm32"))]

use std::fs::OpenOptions;
use std::io::Write;
use std::thread;
use std::time::Duration;

use kernarg_channel::format::IPC_HANDLE_SIZE;
use kernarg_channel::{encode_frame, scan, ChannelError, ExchangeRecord, FrameReader, IpcHandle};
use proptest::prelude::*;
use tempfile::tempdir;

fn record(fill: u8, size: u64) -> ExchangeRecord {
    ExchangeRecord {
        handle: IpcHandle::from_bytes([fill; IPC_HANDLE_SIZE]),
        size,
    }
}

fn append(path: &std::path::Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
}

#[test]
fn duplicate_handle_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ipc_handle.bin");
    append(&path, &encode_frame(&record(0x11, 64)));
    append(&path, &encode_frame(&record(0x11, 64)));
    append(&path, &encode_frame(&record(0x22, 128)));

    let out = FrameReader::new(&path, 2).collect().unwrap();
    assert_eq!(out.records, vec![record(0x11, 64), record(0x22, 128)]);
    assert_eq!(out.diagnostics.duplicates, 1);
}

#[test]
fn waits_for_records_written_by_a_concurrent_producer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ipc_handle.bin");

    let writer_path = path.clone();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        let first = encode_frame(&record(1, 4096));
        // Split the first frame across two writes so a poll can observe the partial tail.
        append(&writer_path, &first[..30]);
        thread::sleep(Duration::from_millis(30));
        append(&writer_path, &first[30..]);
        thread::sleep(Duration::from_millis(30));
        append(&writer_path, &encode_frame(&record(2, 400)));
    });

    let out = FrameReader::new(&path, 2)
        .with_poll_interval(Duration::from_millis(5))
        .with_timeout(Some(Duration::from_secs(10)))
        .collect()
        .unwrap();
    producer.join().unwrap();

    assert_eq!(out.records, vec![record(1, 4096), record(2, 400)]);
    assert!(out.polls > 1);
}

#[test]
fn times_out_when_producer_stalls() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ipc_handle.bin");
    append(&path, &encode_frame(&record(9, 8)));

    let err = FrameReader::new(&path, 3)
        .with_poll_interval(Duration::from_millis(5))
        .with_timeout(Some(Duration::from_millis(50)))
        .collect()
        .unwrap_err();
    match err {
        ChannelError::Timeout {
            expected,
            received,
            waited,
        } => {
            assert_eq!(expected, 3);
            assert_eq!(received, 1);
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn malformed_segments_do_not_block_valid_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ipc_handle.bin");
    append(&path, &encode_frame(&record(1, 4)));
    append(&path, b"BEGIN\n");
    append(&path, &[0x5A; 71]);
    append(&path, b"END\n");
    append(&path, b"BEGIN\n");
    append(&path, &[0xA5; 73]);
    append(&path, b"END\n");
    append(&path, &encode_frame(&record(2, 8)));

    let out = FrameReader::new(&path, 2).collect().unwrap();
    assert_eq!(out.records, vec![record(1, 4), record(2, 8)]);
    assert_eq!(out.diagnostics.malformed, 2);
}

#[test]
fn rereading_a_complete_file_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ipc_handle.bin");
    for fill in 1..=4 {
        append(&path, &encode_frame(&record(fill, u64::from(fill) * 16)));
    }

    let reader = FrameReader::new(&path, 4);
    let first = reader.collect().unwrap();
    for _ in 0..5 {
        assert_eq!(reader.collect().unwrap().records, first.records);
    }
}

fn arb_record() -> impl Strategy<Value = ExchangeRecord> {
    // Sizes stay below 2^24 so the size bytes can never spell a delimiter.
    (0u8..6, 0u64..(1 << 24)).prop_map(|(fill, size)| record(fill, size))
}

proptest! {
    #[test]
    fn scan_returns_distinct_handles_in_first_seen_order(
        records in proptest::collection::vec(arb_record(), 0..24),
    ) {
        let mut data = Vec::new();
        for r in &records {
            data.extend(encode_frame(r));
        }

        let mut expected: Vec<ExchangeRecord> = Vec::new();
        for r in &records {
            if !expected.iter().any(|e| e.handle == r.handle) {
                expected.push(*r);
            }
        }

        let out = scan(&data);
        prop_assert_eq!(&out.records, &expected);
        prop_assert_eq!(out.diagnostics.duplicates, records.len() - expected.len());
        prop_assert_eq!(out.diagnostics.malformed, 0);
    }

    #[test]
    fn garbage_payloads_never_hide_valid_frames(
        fills in proptest::collection::vec(0u8..4, 1..8),
        junk_len in (0usize..140).prop_filter("not a record", |n| *n != 72),
    ) {
        let mut data = Vec::new();
        for fill in &fills {
            data.extend_from_slice(b"BEGIN\n");
            // 0xEE never forms "BEGIN\n" or "END\n" so the junk stays one segment.
            data.extend(std::iter::repeat(0xEE).take(junk_len));
            data.extend_from_slice(b"END\n");
            data.extend(encode_frame(&record(*fill, 12)));
        }

        let out = scan(&data);
        let mut unique: Vec<u8> = Vec::new();
        for f in &fills {
            if !unique.contains(f) {
                unique.push(*f);
            }
        }
        prop_assert_eq!(out.records.len(), unique.len());
        prop_assert_eq!(out.diagnostics.malformed, fills.len());
    }
}
