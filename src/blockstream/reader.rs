use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::blockstream::format::{read_u64, BlockStreamHeader, StreamEntry};
use crate::blockstream::pool::FileHandlePool;
use crate::error::{CacheResult, PreconditionViolation, ResourceError};

#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// The most recently read position. `None` before the first read
    current: Option<u64>,
    /// Positions left unread in the stream
    remaining: u64,
}

/// Answers "when is this block next used" from a block stream file.
///
/// Each stream keeps a cursor on the last position it read and only reads forward, so the cost of
/// a whole run is one pass over the file. That only works while queries never go back in time,
/// which is enforced across all streams.
pub struct BlockStreamReader {
    path: PathBuf,
    block_size: u64,
    entries: Vec<StreamEntry>,
    index: HashMap<u64, usize>,
    cursors: Vec<Cursor>,
    pool: FileHandlePool,
    last_query: Option<u64>,
}

impl BlockStreamReader {
    /// Opens a block stream file
    ///
    /// # Arguments
    ///
    /// * `path`: A file written by [BlockStreamWriter](crate::blockstream::BlockStreamWriter)
    /// * `requested_handles`: How many file handles may be held open at once. 0 probes the process
    /// for how many it can spare
    ///
    /// returns: Result<BlockStreamReader, ResourceError>
    pub fn open(path: &Path, requested_handles: usize) -> Result<Self, ResourceError> {
        let file = File::open(path).map_err(|e| ResourceError::Open(path.to_path_buf(), e))?;
        let file_len = file.metadata()?.len();
        let header = BlockStreamHeader::read_from(path, BufReader::new(file), file_len)?;
        let index = header
            .entries
            .iter()
            .enumerate()
            .map(|(stream, entry)| (entry.block_address, stream))
            .collect();
        let cursors = header
            .entries
            .iter()
            .map(|entry| Cursor { current: None, remaining: entry.len() })
            .collect();
        let pool = FileHandlePool::open(path, header.entries.iter().map(|entry| entry.start).collect(), requested_handles)?;
        info!(
            "Opened block stream file {} with {} streams, block size {} and {} handles",
            path.display(),
            header.entries.len(),
            header.block_size,
            pool.num_handles()
        );
        Ok(Self {
            path: path.to_path_buf(),
            block_size: header.block_size,
            entries: header.entries,
            index,
            cursors,
            pool,
            last_query: None,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn num_streams(&self) -> usize {
        self.entries.len()
    }

    pub fn num_handles(&self) -> usize {
        self.pool.num_handles()
    }

    /// How often a file handle had to be moved between streams
    pub fn handle_swaps(&self) -> u64 {
        self.pool.swaps()
    }

    /// The number of times `block_address` appears in the trace, if it appears at all
    pub fn occurrences(&self, block_address: u64) -> Option<u64> {
        self.index.get(&block_address).map(|stream| self.entries[*stream].len())
    }

    /// Finds the first position at or after `position` where `block_address` is accessed.
    ///
    /// # Arguments
    ///
    /// * `block_address`: A block that appears in the trace
    /// * `position`: Must be no earlier than the position of any previous query
    ///
    /// returns: CacheResult<Option<u64>>, `None` if the block is never accessed again
    pub fn next(&mut self, block_address: u64, position: u64) -> CacheResult<Option<u64>> {
        if let Some(last) = self.last_query {
            if position < last {
                return Err(PreconditionViolation::QueryInPast { requested: position, last }.into());
            }
        }
        self.last_query = Some(position);
        let stream = *self
            .index
            .get(&block_address)
            .ok_or(PreconditionViolation::UnknownBlockStream(block_address))?;

        let mut cursor = self.cursors[stream];
        let result = loop {
            match cursor.current {
                Some(current) if current >= position => break Some(current),
                _ if cursor.remaining == 0 => {
                    cursor.current = None;
                    break None;
                }
                _ => {
                    let reader = self.pool.access(stream)?;
                    cursor.current = Some(read_u64(reader).map_err(ResourceError::from)?);
                    cursor.remaining -= 1;
                }
            }
        };
        self.cursors[stream] = cursor;
        Ok(result)
    }

    /// Writes a human readable listing of every stream, independent of any query state
    pub fn dump<W: Write>(&self, mut out: W) -> Result<(), ResourceError> {
        let file = File::open(&self.path).map_err(|e| ResourceError::Open(self.path.clone(), e))?;
        let mut reader = BufReader::new(file);
        writeln!(out, "{}: block size {}, {} streams", self.path.display(), self.block_size, self.entries.len())?;
        for entry in &self.entries {
            reader.seek(SeekFrom::Start(entry.start))?;
            write!(out, "{:#018x} ({}):", entry.block_address, entry.len())?;
            for _ in 0..entry.len() {
                write!(out, " {}", read_u64(&mut reader)?)?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}
