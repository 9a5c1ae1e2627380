use std::fs;

use crate::error::{EndOfTrace, ResourceError};
use crate::trace::{MemoryAccess, Trace, TraceSource, RECORD_SIZE};
use crate::util::temp_path;

fn raw_record(address: u64, code: u32) -> Vec<u8> {
    let mut record = address.to_le_bytes().to_vec();
    record.extend_from_slice(&code.to_le_bytes());
    record.extend_from_slice(&[0u8; 4]);
    record
}

#[test]
fn raw_records_skip_non_memory_codes() {
    let bytes: Vec<u8> = [raw_record(0x10, 1), raw_record(0x20, 7), raw_record(0x30, 2), raw_record(0x40, 0)].concat();
    let trace = Trace::from_raw_bytes(&bytes).unwrap();
    assert_eq!(trace.accesses(), &[MemoryAccess::read(0x10), MemoryAccess::write(0x30)]);
}

#[test]
fn raw_records_must_be_whole() {
    let mut bytes = raw_record(0x10, 1);
    bytes.push(0);
    assert!(matches!(
        Trace::from_raw_bytes(&bytes),
        Err(ResourceError::PartialRecord { len: 17, record_size: RECORD_SIZE })
    ));
}

#[test]
fn open_reads_a_raw_trace_file() {
    let original = Trace::new(vec![MemoryAccess::read(0xdead), MemoryAccess::write(0xbeef), MemoryAccess::read(0)]);
    let path = temp_path("trace.raw");
    let mut bytes = Vec::new();
    original.write_raw(&mut bytes).unwrap();
    fs::write(&path, &bytes).unwrap();
    assert_eq!(Trace::open(&path).unwrap().accesses(), original.accesses());

    let empty = temp_path("empty.raw");
    fs::write(&empty, b"").unwrap();
    assert!(Trace::open(&empty).unwrap().is_empty());
}

#[test]
fn text_lines_are_parsed() {
    let text = b"0000000000400000 00007fff5fbff8a8 R 008\n\
                 0000000000400004 00000000006010A0 W 004\n";
    let trace = Trace::parse_text(text).unwrap();
    assert_eq!(trace.accesses(), &[MemoryAccess::read(0x7fff5fbff8a8), MemoryAccess::write(0x6010a0)]);

    let path = temp_path("trace.txt");
    fs::write(&path, text).unwrap();
    assert_eq!(Trace::open_text(&path).unwrap().accesses(), trace.accesses());
}

#[test]
fn malformed_text_lines_are_reported() {
    let bad_mode = b"0000000000400000 00007fff5fbff8a8 R 008\n0000000000400000 00007fff5fbff8a8 X 008\n";
    assert!(matches!(Trace::parse_text(bad_mode), Err(ResourceError::MalformedTraceLine { line: 2, .. })));

    let bad_address = b"0000000000400000 00007fff5fbgf8a8 R 008\n";
    assert!(matches!(Trace::parse_text(bad_address), Err(ResourceError::MalformedTraceLine { line: 1, .. })));

    let short = b"0000000000400000 00007fff5fbff8a8 R 08\n";
    assert!(matches!(Trace::parse_text(short), Err(ResourceError::PartialRecord { .. })));
}

#[test]
fn position_is_the_next_unread_record() {
    let mut trace = Trace::new((0..5).map(|i| MemoryAccess::read(i * 8)).collect());
    assert_eq!(trace.current_position(), 0);
    assert_eq!(trace.next_record(), Ok(MemoryAccess::read(0)));
    assert_eq!(trace.current_position(), 1);
    assert_eq!(trace.peek_ahead(2), &[MemoryAccess::read(8), MemoryAccess::read(16)]);
    assert_eq!(trace.peek_ahead(100).len(), 4);
    // Peeking doesn't consume
    assert_eq!(trace.current_position(), 1);

    trace.seek(4);
    assert_eq!(trace.next_record(), Ok(MemoryAccess::read(32)));
    assert_eq!(trace.next_record(), Err(EndOfTrace));
    assert!(trace.peek_ahead(10).is_empty());

    trace.seek(1000);
    assert_eq!(trace.current_position(), 5);
    trace.seek(0);
    assert_eq!(trace.next_record(), Ok(MemoryAccess::read(0)));
}

#[test]
fn temp_files_go_away_with_their_path() {
    let path = temp_path("scratch.raw");
    let kept = path.path().to_path_buf();
    fs::write(&path, b"scratch").unwrap();
    assert!(kept.exists());
    drop(path);
    assert!(!kept.exists());
}
