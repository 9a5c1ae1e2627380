use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for cache simulation
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Precondition violated: {0}")]
    Precondition(#[from] PreconditionViolation),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

/// Problems with a cache specification, detected while the cache is being built
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Block size must be non-zero")]
    ZeroBlockSize,

    #[error("No block size was given for the cache")]
    MissingBlockSize,

    #[error("Cache level L{} must contain at least one block and one set", .level + 1)]
    EmptyLevel { level: usize },

    #[error("Cache level L{}'s {num_blocks} blocks do not divide evenly into {associativity} sets", .level + 1)]
    UnevenSets { level: usize, num_blocks: u64, associativity: u64 },

    #[error("Cache level L{}'s size ({size} bytes) is not a multiple of the block size ({block_size})", .level + 1)]
    BlockSizeDoesNotDivideSize { level: usize, size: u64, block_size: u64 },

    #[error("Cache level L{}'s size ({size} bytes) is not larger than the last level ({previous} bytes)", .level + 1)]
    LevelTooSmall { level: usize, size: u64, previous: u64 },

    #[error("Shared cache level '{0}' is not defined")]
    UnknownSharedLevel(String),

    #[error("Shared cache level '{0}' is defined more than once")]
    DuplicateSharedLevel(String),

    #[error("Cache block size {cache} does not match the enclosing block size {expected}")]
    BlockSizeMismatch { expected: u64, cache: u64 },

    #[error("Block stream file has block size {file}, but the cache uses {cache}")]
    BlockStreamSizeMismatch { file: u64, cache: u64 },

    #[error("The {0} replacement policy needs a block stream reader")]
    MissingBlockStreams(&'static str),

    #[error("The {0} replacement policy needs a trace source")]
    MissingTrace(&'static str),

    #[error("A cache needs at least one level")]
    NoLevels,

    #[error("Couldn't read the cache description at {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Couldn't parse the cache description: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Violations of an engine invariant. These indicate a bug in the caller or in the engine, never a
/// property of the input data
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("Attempt to allocate block {block_address:#x} in L{}, where it is already present", .level + 1)]
    AllocateExisting { level: usize, block_address: u64 },

    #[error("Attempt to access block {block_address:#x} in L{}, where it is not present", .level + 1)]
    BlockNotPresent { level: usize, block_address: u64 },

    #[error("Cell {cell} is out of range, L{} has {num_blocks} cells", .level + 1)]
    CellOutOfRange { level: usize, cell: usize, num_blocks: usize },

    #[error("Block {block_address:#x} maps to set {set} of L{}, which doesn't contain cell {cell}", .level + 1)]
    CellOutsideSet { level: usize, block_address: u64, set: usize, cell: usize },

    #[error("Eviction requested in set {set} of L{} while cell {cell} is still unmapped", .level + 1)]
    EvictionWithUnmappedBlocks { level: usize, set: usize, cell: usize },

    #[error("Snapshot has {snapshot} levels, the cache has {cache}")]
    SnapshotLevelCount { snapshot: usize, cache: usize },

    #[error("Snapshot level L{} has {snapshot} blocks, the cache level has {cache}", .level + 1)]
    SnapshotLevelSize { level: usize, snapshot: usize, cache: usize },

    #[error("Block stream queried at trace position {requested}, after a query at {last}")]
    QueryInPast { requested: u64, last: u64 },

    #[error("Block {0:#x} has no stream in the block stream file")]
    UnknownBlockStream(u64),

    #[error("Level {level} is out of range, the cache has {levels} levels plus main memory")]
    LevelOutOfRange { level: usize, levels: usize },
}

/// Failures of external resources: files, mappings and file handles
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Couldn't open {0}: {1}")]
    Open(PathBuf, #[source] std::io::Error),

    #[error("Couldn't memory map {0}: {1}")]
    Map(PathBuf, #[source] std::io::Error),

    #[error("Trace data is {len} bytes long, which is not a whole number of {record_size} byte records")]
    PartialRecord { len: usize, record_size: usize },

    #[error("Malformed trace line {line}: {reason}")]
    MalformedTraceLine { line: usize, reason: String },

    #[error("{0} is not a block stream file")]
    BadMagic(PathBuf),

    #[error("Block stream file {0} is truncated")]
    Truncated(PathBuf),

    #[error("Block {0:#x} appears more than once in the block stream header")]
    DuplicateBlock(u64),

    #[error("Block stream for block {block_address:#x} has a byte range ({start}..{limit}) that is not a whole number of positions")]
    BadStreamRange { block_address: u64, start: u64, limit: u64 },

    #[error("No file handles are available for the block stream pool")]
    NoFileHandles,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returned by a trace source once every record has been read. This is the expected way for a
/// simulation run to end, and so is kept apart from [CacheError]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("End of trace")]
pub struct EndOfTrace;

pub type CacheResult<T> = Result<T, CacheError>;
