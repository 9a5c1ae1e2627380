use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::ResourceError;

/// Upper bound on the number of handles opened when probing the descriptor budget
pub const PROBE_LIMIT: usize = 4096;

/// Handles left free for the rest of the process after probing
pub const PROBE_HEADROOM: usize = 16;

/// Runs `f` over the contents of the file at `path`.
///
/// On unix systems the file is memory mapped and the OS is advised that reads will be sequential,
/// which noticeably speeds up reading large traces. Elsewhere the file is read into memory.
pub fn with_file_bytes<T>(path: &Path, f: impl FnOnce(&[u8]) -> T) -> Result<T, ResourceError> {
    let file = File::open(path).map_err(|e| ResourceError::Open(path.to_path_buf(), e))?;
    // Zero length mappings are rejected by some platforms
    if file.metadata()?.len() == 0 {
        return Ok(f(&[]));
    }
    #[cfg(not(unix))]
    {
        use std::io::Read;
        let mut buf = Vec::new();
        let mut file = file;
        file.read_to_end(&mut buf)?;
        Ok(f(&buf))
    }
    #[cfg(unix)]
    {
        use memmap2::Advice;
        // The mapping is only read, and only for the duration of `f`
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ResourceError::Map(path.to_path_buf(), e))?;
        mmap.advise(Advice::Sequential).map_err(|e| ResourceError::Map(path.to_path_buf(), e))?;
        Ok(f(&mmap))
    }
}

/// Estimates how many more handles onto `path` this process can hold open at once.
///
/// Handles are opened until the OS refuses or `limit` is reached, then all of them are closed again.
/// [PROBE_HEADROOM] handles are kept back so the rest of the process can still open files.
pub fn probe_handle_budget(path: &Path, limit: usize) -> usize {
    let mut handles = Vec::new();
    while handles.len() < limit {
        match File::open(path) {
            Ok(file) => handles.push(file),
            Err(_) => break,
        }
    }
    let opened = handles.len();
    drop(handles);
    if opened == limit {
        opened
    } else {
        opened.saturating_sub(PROBE_HEADROOM)
    }
}
