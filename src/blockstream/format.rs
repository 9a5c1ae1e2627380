use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use log::info;

use crate::error::ResourceError;
use crate::trace::MemoryAccess;

/// Identifies a block stream file
pub const MAGIC: &[u8; 15] = b"MTV:BlockStream";
/// Magic, block size and stream count
pub const HEADER_SIZE: u64 = MAGIC.len() as u64 + 4 + 8;
/// Block address and byte offset
pub const ENTRY_SIZE: u64 = 16;
pub const POSITION_SIZE: u64 = 8;

/// Where one block's stream of positions lives in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEntry {
    pub block_address: u64,
    /// Absolute file offset of the first position
    pub start: u64,
    /// Absolute file offset one past the last position
    pub limit: u64,
}

impl StreamEntry {
    pub fn len(&self) -> u64 {
        (self.limit - self.start) / POSITION_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.limit
    }
}

/// The decoded header and table of a block stream file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStreamHeader {
    pub block_size: u64,
    pub entries: Vec<StreamEntry>,
}

impl BlockStreamHeader {
    /// Reads and validates the header and table
    ///
    /// # Arguments
    ///
    /// * `path`: Only used to report errors
    /// * `reader`: Positioned at the start of the file
    /// * `file_len`: The length of the whole file in bytes
    ///
    /// returns: Result<BlockStreamHeader, ResourceError>
    pub fn read_from<R: Read>(path: &Path, mut reader: R, file_len: u64) -> Result<Self, ResourceError> {
        let truncated = |e: std::io::Error| match e.kind() {
            ErrorKind::UnexpectedEof => ResourceError::Truncated(path.to_path_buf()),
            _ => ResourceError::Io(e),
        };
        let mut magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut magic).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ResourceError::BadMagic(path.to_path_buf()),
            _ => ResourceError::Io(e),
        })?;
        if &magic != MAGIC {
            return Err(ResourceError::BadMagic(path.to_path_buf()));
        }
        let block_size = read_u32(&mut reader).map_err(truncated)? as u64;
        let count = read_u64(&mut reader).map_err(truncated)?;
        let data_start = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|table| table.checked_add(HEADER_SIZE))
            .filter(|data_start| *data_start <= file_len)
            .ok_or_else(|| ResourceError::Truncated(path.to_path_buf()))?;

        let mut table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let block_address = read_u64(&mut reader).map_err(truncated)?;
            let offset = read_u64(&mut reader).map_err(truncated)?;
            table.push((block_address, offset));
        }

        let mut seen = HashMap::with_capacity(table.len());
        let mut entries = Vec::with_capacity(table.len());
        for (index, (block_address, offset)) in table.iter().enumerate() {
            if seen.insert(*block_address, index).is_some() {
                return Err(ResourceError::DuplicateBlock(*block_address));
            }
            let start = data_start.saturating_add(*offset);
            let limit = table
                .get(index + 1)
                .map(|(_, next)| data_start.saturating_add(*next))
                .unwrap_or(file_len);
            if start > limit || limit > file_len || (limit - start) % POSITION_SIZE != 0 {
                return Err(ResourceError::BadStreamRange { block_address: *block_address, start, limit });
            }
            entries.push(StreamEntry { block_address: *block_address, start, limit });
        }
        Ok(Self { block_size, entries })
    }
}

/// Builds block stream files from a trace
pub struct BlockStreamWriter;

impl BlockStreamWriter {
    /// Builds the block stream file for `accesses` at `path`
    ///
    /// # Arguments
    ///
    /// * `accesses`: The whole trace, in order. Positions in the file are indices into it
    /// * `block_size`: The block size of the cache the file will be used with
    /// * `path`: Where to write the file. An existing file is replaced
    ///
    /// returns: Result<usize, ResourceError>, the number of streams written
    pub fn build(accesses: &[MemoryAccess], block_size: u64, path: &Path) -> Result<usize, ResourceError> {
        let file = File::create(path).map_err(|e| ResourceError::Open(path.to_path_buf(), e))?;
        let count = Self::write(accesses, block_size, BufWriter::new(file))?;
        info!("Wrote {count} block streams for {} accesses to {}", accesses.len(), path.display());
        Ok(count)
    }

    /// Writes a block stream file for `accesses` to `writer`. Streams are laid out in order of each
    /// block's first appearance
    pub fn write<W: Write>(accesses: &[MemoryAccess], block_size: u64, mut writer: W) -> Result<usize, ResourceError> {
        let block_size_field = u32::try_from(block_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, format!("unusable block size {block_size}")))?;

        let mut index: HashMap<u64, usize> = HashMap::new();
        let mut streams: Vec<(u64, Vec<u64>)> = Vec::new();
        for (position, access) in accesses.iter().enumerate() {
            let block_address = access.block_address(block_size);
            let stream = *index.entry(block_address).or_insert_with(|| {
                streams.push((block_address, Vec::new()));
                streams.len() - 1
            });
            streams[stream].1.push(position as u64);
        }

        writer.write_all(MAGIC)?;
        writer.write_all(&block_size_field.to_le_bytes())?;
        writer.write_all(&(streams.len() as u64).to_le_bytes())?;
        let mut offset = 0u64;
        for (block_address, positions) in &streams {
            writer.write_all(&block_address.to_le_bytes())?;
            writer.write_all(&offset.to_le_bytes())?;
            offset += positions.len() as u64 * POSITION_SIZE;
        }
        for (_, positions) in &streams {
            for position in positions {
                writer.write_all(&position.to_le_bytes())?;
            }
        }
        writer.flush()?;
        Ok(streams.len())
    }
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
