use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{EndOfTrace, ResourceError};
use crate::io::with_file_bytes;

/// Size in bytes of one record in the raw binary trace format
pub const RECORD_SIZE: usize = 16;
const READ_CODE: u32 = 1;
const WRITE_CODE: u32 = 2;

/// Size in bytes of one line in the text trace format
pub const LINE_SIZE: usize = 40;
const ADDRESS_OFFSET: usize = 17;
const ADDRESS_SIZE: usize = 16;
const ADDRESS_UPPER: usize = ADDRESS_OFFSET + ADDRESS_SIZE;
const RW_MODE: usize = ADDRESS_UPPER + 1;
const SIZE: usize = RW_MODE + 2;
const INVALID_HEX: u8 = 0xff;
const HEX_LOOKUP: [u8; 256] = generate_hex_lookup_table();

/// Whether a memory access reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Write,
}

/// A single memory access from a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAccess {
    pub op: Operation,
    pub address: u64,
}

impl MemoryAccess {
    pub fn read(address: u64) -> Self {
        Self { op: Operation::Read, address }
    }

    pub fn write(address: u64) -> Self {
        Self { op: Operation::Write, address }
    }

    /// The address of the block holding this access
    ///
    /// ```
    /// use cachesim::trace::MemoryAccess;
    /// assert_eq!(MemoryAccess::read(0x47).block_address(16), 0x4);
    /// ```
    pub fn block_address(&self, block_size: u64) -> u64 {
        self.address / block_size
    }
}

/// An ordered, replayable sequence of memory accesses.
///
/// Positions count memory accesses from the start of the trace. `current_position` is the index of
/// the next record `next_record` will return, so after reading a record the current position is one
/// past it
pub trait TraceSource {
    /// Reads the next memory access, advancing the position
    fn next_record(&mut self) -> Result<MemoryAccess, EndOfTrace>;

    /// Up to `window` upcoming accesses, starting at the current position, without consuming them
    fn peek_ahead(&self, window: usize) -> &[MemoryAccess];

    fn current_position(&self) -> u64;

    /// Moves to an absolute position. Seeking past the end leaves the source exhausted
    fn seek(&mut self, position: u64);
}

/// Single-threaded handle to a trace, shared between the driver and the policies that need to see
/// the future
pub type SharedTrace = Rc<RefCell<dyn TraceSource>>;

/// A fully decoded trace held in memory
#[derive(Debug, Clone, Default)]
pub struct Trace {
    accesses: Vec<MemoryAccess>,
    position: usize,
}

impl Trace {
    pub fn new(accesses: Vec<MemoryAccess>) -> Self {
        Self { accesses, position: 0 }
    }

    /// Opens a trace in the raw binary record format
    ///
    /// # Arguments
    ///
    /// * `path`: The trace file. It is memory mapped for reading
    ///
    /// returns: Result<Trace, ResourceError>
    pub fn open(path: &Path) -> Result<Self, ResourceError> {
        let trace = with_file_bytes(path, Self::from_raw_bytes)??;
        info!("Loaded {} memory accesses from {}", trace.len(), path.display());
        Ok(trace)
    }

    /// Opens a trace in the fixed width text format
    pub fn open_text(path: &Path) -> Result<Self, ResourceError> {
        let trace = with_file_bytes(path, Self::parse_text)??;
        info!("Loaded {} memory accesses from {}", trace.len(), path.display());
        Ok(trace)
    }

    /// Decodes raw binary records.
    ///
    /// Each record is 16 bytes: a little-endian `u64` address, a little-endian `u32` record code and
    /// four bytes of padding. Code 1 is a read and code 2 a write; every other code marks a record
    /// that isn't a memory access, and is skipped.
    ///
    /// # Arguments
    ///
    /// * `bytes`: The records. The length must be a multiple of [RECORD_SIZE]
    ///
    /// returns: Result<Trace, ResourceError>
    pub fn from_raw_bytes(bytes: &[u8]) -> Result<Self, ResourceError> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(ResourceError::PartialRecord { len: bytes.len(), record_size: RECORD_SIZE });
        }
        let accesses = bytes
            .chunks_exact(RECORD_SIZE)
            .filter_map(|record| {
                let mut address = [0u8; 8];
                address.copy_from_slice(&record[0..8]);
                let mut code = [0u8; 4];
                code.copy_from_slice(&record[8..12]);
                let address = u64::from_le_bytes(address);
                match u32::from_le_bytes(code) {
                    READ_CODE => Some(MemoryAccess::read(address)),
                    WRITE_CODE => Some(MemoryAccess::write(address)),
                    _ => None,
                }
            })
            .collect();
        Ok(Self::new(accesses))
    }

    /// Decodes the fixed width text format, one 40 byte line per access:
    /// `<pc:16 hex> <address:16 hex> <R|W> <size:3 dec>\n`.
    ///
    /// The program counter and access size are validated but not kept.
    ///
    /// ```
    /// use cachesim::trace::{MemoryAccess, Trace};
    /// let trace = Trace::parse_text(b"0000000000400000 00007fff5fbff8a8 W 008\n").unwrap();
    /// assert_eq!(trace.accesses(), &[MemoryAccess::write(0x7fff5fbff8a8)]);
    /// ```
    pub fn parse_text(bytes: &[u8]) -> Result<Self, ResourceError> {
        if bytes.len() % LINE_SIZE != 0 {
            return Err(ResourceError::PartialRecord { len: bytes.len(), record_size: LINE_SIZE });
        }
        let accesses = bytes
            .chunks_exact(LINE_SIZE)
            .enumerate()
            .map(|(index, line)| parse_line(line).map_err(|reason| ResourceError::MalformedTraceLine {
                line: index + 1,
                reason: reason.to_string(),
            }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(accesses))
    }

    /// Encodes the trace in the raw binary record format
    pub fn write_raw<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for access in &self.accesses {
            let code = match access.op {
                Operation::Read => READ_CODE,
                Operation::Write => WRITE_CODE,
            };
            writer.write_all(&access.address.to_le_bytes())?;
            writer.write_all(&code.to_le_bytes())?;
            writer.write_all(&[0u8; 4])?;
        }
        writer.flush()
    }

    pub fn accesses(&self) -> &[MemoryAccess] {
        &self.accesses
    }

    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    pub fn into_shared(self) -> SharedTrace {
        Rc::new(RefCell::new(self))
    }
}

impl TraceSource for Trace {
    fn next_record(&mut self) -> Result<MemoryAccess, EndOfTrace> {
        let access = *self.accesses.get(self.position).ok_or(EndOfTrace)?;
        self.position += 1;
        Ok(access)
    }

    fn peek_ahead(&self, window: usize) -> &[MemoryAccess] {
        let start = self.position.min(self.accesses.len());
        let end = start.saturating_add(window).min(self.accesses.len());
        &self.accesses[start..end]
    }

    fn current_position(&self) -> u64 {
        self.position as u64
    }

    fn seek(&mut self, position: u64) {
        self.position = usize::try_from(position).unwrap_or(usize::MAX).min(self.accesses.len());
    }
}

fn parse_line(line: &[u8]) -> Result<MemoryAccess, &'static str> {
    if line[LINE_SIZE - 1] != b'\n' {
        return Err("line is not terminated by a newline");
    }
    if line[ADDRESS_OFFSET - 1] != b' ' || line[ADDRESS_UPPER] != b' ' || line[SIZE - 1] != b' ' {
        return Err("fields are not separated by single spaces");
    }
    parse_hex(&line[0..ADDRESS_SIZE]).ok_or("program counter is not hexadecimal")?;
    let address = parse_hex(&line[ADDRESS_OFFSET..ADDRESS_UPPER]).ok_or("address is not hexadecimal")?;
    if !line[SIZE..LINE_SIZE - 1].iter().all(u8::is_ascii_digit) {
        return Err("access size is not decimal");
    }
    match line[RW_MODE] {
        b'R' => Ok(MemoryAccess::read(address)),
        b'W' => Ok(MemoryAccess::write(address)),
        _ => Err("access mode is neither R nor W"),
    }
}

// Invalid digits map to INVALID_HEX
fn parse_hex(digits: &[u8]) -> Option<u64> {
    digits.iter().try_fold(0u64, |acc, digit| {
        match HEX_LOOKUP[*digit as usize] {
            INVALID_HEX => None,
            value => Some((acc << 4) | value as u64),
        }
    })
}

const fn generate_hex_lookup_table() -> [u8; 256] {
    let mut output = [INVALID_HEX; 256];
    let mut input: usize = 0;
    while input < 256 {
        let c = input as u8;
        if c >= b'0' && c <= b'9' {
            output[input] = c - b'0';
        } else if c >= b'A' && c <= b'F' {
            output[input] = c - b'A' + 10;
        } else if c >= b'a' && c <= b'f' {
            output[input] = c - b'a' + 10;
        }
        input += 1;
    }
    output
}
