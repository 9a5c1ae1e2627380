use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{trace, warn};

use crate::error::ResourceError;
use crate::io::{probe_handle_budget, PROBE_LIMIT};

const NIL: usize = usize::MAX;
// Streams are read a few positions at a time, a full 8KiB buffer wastes memory across many handles
const HANDLE_BUFFER_SIZE: usize = 512;

struct Handle {
    reader: BufReader<File>,
    stream: Option<usize>,
    prev: usize,
    next: usize,
}

/// A bounded set of open handles onto one file, each parked on a different stream.
///
/// Every stream has a saved position, starting at its first byte. Asking for a stream that has no
/// handle takes the least recently used handle, saves where that handle's stream had got to, and
/// seeks it to the requested stream's saved position.
pub struct FileHandlePool {
    path: PathBuf,
    handles: Vec<Handle>,
    owners: Vec<Option<usize>>,
    saved: Vec<u64>,
    // Most and least recently used ends of the handle list
    head: usize,
    tail: usize,
    swaps: u64,
}

impl FileHandlePool {
    /// Opens the pool
    ///
    /// # Arguments
    ///
    /// * `path`: The file every handle reads
    /// * `stream_starts`: The first byte of each stream
    /// * `requested`: The number of handles wanted, or 0 to use as many as the process can spare.
    /// Never more than one handle per stream is opened
    ///
    /// returns: Result<FileHandlePool, ResourceError>
    pub fn open(path: &Path, stream_starts: Vec<u64>, requested: usize) -> Result<Self, ResourceError> {
        let budget = if requested == 0 { probe_handle_budget(path, PROBE_LIMIT) } else { requested };
        let capacity = budget.min(stream_starts.len());
        if capacity == 0 && !stream_starts.is_empty() {
            return Err(ResourceError::NoFileHandles);
        }

        let mut handles: Vec<Handle> = Vec::with_capacity(capacity);
        while handles.len() < capacity {
            match File::open(path) {
                Ok(file) => {
                    let index = handles.len();
                    handles.push(Handle {
                        reader: BufReader::with_capacity(HANDLE_BUFFER_SIZE, file),
                        stream: None,
                        prev: if index == 0 { NIL } else { index - 1 },
                        next: NIL,
                    });
                    if index > 0 {
                        handles[index - 1].next = index;
                    }
                }
                Err(e) if handles.is_empty() => return Err(ResourceError::Open(path.to_path_buf(), e)),
                Err(e) => {
                    warn!("Only {} of {capacity} block stream handles could be opened: {e}", handles.len());
                    break;
                }
            }
        }

        let (head, tail) = if handles.is_empty() { (NIL, NIL) } else { (0, handles.len() - 1) };
        Ok(Self {
            path: path.to_path_buf(),
            owners: vec![None; stream_starts.len()],
            saved: stream_starts,
            handles,
            head,
            tail,
            swaps: 0,
        })
    }

    pub fn num_handles(&self) -> usize {
        self.handles.len()
    }

    /// The number of times a handle has been seeked onto a stream it wasn't parked on
    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    /// A reader positioned where `stream` was last left, which becomes the most recently used handle
    pub fn access(&mut self, stream: usize) -> Result<&mut BufReader<File>, ResourceError> {
        let handle = match self.owners[stream] {
            Some(handle) => handle,
            None => self.reassign(stream)?,
        };
        self.promote(handle);
        Ok(&mut self.handles[handle].reader)
    }

    fn reassign(&mut self, stream: usize) -> Result<usize, ResourceError> {
        let handle = self.tail;
        if handle == NIL {
            return Err(ResourceError::NoFileHandles);
        }
        if let Some(previous) = self.handles[handle].stream.take() {
            self.saved[previous] = self.handles[handle].reader.stream_position()?;
            self.owners[previous] = None;
            trace!("Handle {handle} on {} moved from stream {previous} to {stream}", self.path.display());
        }
        self.handles[handle].reader.seek(SeekFrom::Start(self.saved[stream]))?;
        self.handles[handle].stream = Some(stream);
        self.owners[stream] = Some(handle);
        self.swaps += 1;
        Ok(handle)
    }

    fn promote(&mut self, handle: usize) {
        if self.head == handle {
            return;
        }
        // Unlink
        let (prev, next) = (self.handles[handle].prev, self.handles[handle].next);
        if prev != NIL {
            self.handles[prev].next = next;
        }
        if next != NIL {
            self.handles[next].prev = prev;
        } else {
            self.tail = prev;
        }
        // Push to the front
        self.handles[handle].prev = NIL;
        self.handles[handle].next = self.head;
        if self.head != NIL {
            self.handles[self.head].prev = handle;
        }
        self.head = handle;
        if self.tail == NIL {
            self.tail = handle;
        }
    }
}
