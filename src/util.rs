use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::trace::MemoryAccess;

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Reads of `blocks` consecutive blocks, in order, repeated `rounds` times. With one block more than
/// a fully associative cache holds, this is the classic worst case for LRU
///
/// ```
/// use cachesim::util::cyclic_trace;
/// let trace = cyclic_trace(3, 2, 16);
/// let addresses: Vec<u64> = trace.iter().map(|access| access.address).collect();
/// assert_eq!(addresses, vec![0, 16, 32, 0, 16, 32]);
/// ```
pub fn cyclic_trace(blocks: u64, rounds: usize, block_size: u64) -> Vec<MemoryAccess> {
    (0..rounds)
        .flat_map(|_| (0..blocks).map(|block| MemoryAccess::read(block * block_size)))
        .collect()
}

/// `len` accesses spread uniformly over `blocks` blocks, with roughly `write_ratio` of them writes
pub fn random_trace(len: usize, blocks: u64, block_size: u64, write_ratio: f64, seed: u64) -> Vec<MemoryAccess> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let address = rng.gen_range(0..blocks) * block_size + rng.gen_range(0..block_size);
            if rng.gen_bool(write_ratio) {
                MemoryAccess::write(address)
            } else {
                MemoryAccess::read(address)
            }
        })
        .collect()
}

/// A path in the system temp directory, unique within this process. Whatever file ends up at the
/// path is removed when this is dropped
#[derive(Debug)]
pub struct TempPath(PathBuf);

impl TempPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Deref for TempPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for TempPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        // The file may never have been written
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Reserves a fresh [TempPath] ending in `name`
pub fn temp_path(name: &str) -> TempPath {
    let id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    TempPath(std::env::temp_dir().join(format!("cachesim-{}-{id}-{name}", std::process::id())))
}
