use std::cell::RefCell;
use std::rc::Rc;

use crate::blockstream::{BlockStreamReader, BlockStreamWriter, SharedBlockStreams};
use crate::cache::Cache;
use crate::level::CacheLevel;
use crate::trace::{MemoryAccess, SharedTrace};
use crate::util::temp_path;

mod cache;
mod policies;
mod trace;

/// Builds a block stream file for `accesses` and opens it with `handles` file handles
fn streams_for(accesses: &[MemoryAccess], block_size: u64, handles: usize) -> SharedBlockStreams {
    let path = temp_path("streams.bin");
    BlockStreamWriter::build(accesses, block_size, &path).unwrap();
    // Every handle is open by now, so the file can go with the path
    Rc::new(RefCell::new(BlockStreamReader::open(&path, handles).unwrap()))
}

/// Runs the rest of the trace through the cache, returning how many accesses went to main memory
fn count_memory_accesses(cache: &mut Cache, trace: &SharedTrace) -> usize {
    let mut count = 0;
    loop {
        // The borrow must end before the access, the policy may need the trace
        let next = trace.borrow_mut().next_record();
        let Ok(access) = next else { break };
        cache.access(access).unwrap();
        if cache.hits().any(|hit| hit.level == cache.num_levels()) {
            count += 1;
        }
    }
    count
}

/// Checks every set holds no more than it can, and only blocks that map to it
fn assert_level_consistent(level: &CacheLevel) {
    for set in 0..level.num_sets() {
        assert!(level.mapped_in_set(set) <= level.blocks_per_set());
        for cell in level.set_cells(set) {
            let block = level.block(cell).unwrap();
            assert_eq!(block.cell, cell);
            if block.mapped {
                assert_eq!(level.set_index(block.block_address), set);
                assert_eq!(level.find(block.block_address), Some(cell));
            }
        }
    }
}
