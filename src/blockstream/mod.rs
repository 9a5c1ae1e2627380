//! Block stream files: for every block address in a trace, the ordered list of positions at which
//! it is accessed. They let the exact OPT and PES policies look arbitrarily far into the future
//! without holding the whole future in memory.

/// The on-disk layout, and building files from a trace
pub mod format;

/// A bounded LRU pool of file handles onto one block stream file
pub mod pool;

/// Next-use queries against a block stream file
pub mod reader;

use std::cell::RefCell;
use std::rc::Rc;

pub use format::BlockStreamWriter;
pub use reader::BlockStreamReader;

/// Single-threaded handle to a reader, shared between the caches of a cache set
pub type SharedBlockStreams = Rc<RefCell<BlockStreamReader>>;
