use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PreconditionViolation};

/// What a level does with a write once it has updated its own copy of the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    /// Pass the write straight on to the next level
    #[serde(alias = "writethrough", alias = "write_through")]
    WriteThrough,
    /// Keep the write until the block is evicted
    #[serde(alias = "writeback", alias = "write_back")]
    WriteBack,
}

/// One slot of a cache level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBlock {
    pub block_address: u64,
    pub dirty: bool,
    pub mapped: bool,
    /// Index of the slot within the level
    pub cell: usize,
}

impl CacheBlock {
    fn unmapped(cell: usize) -> Self {
        Self { block_address: 0, dirty: false, mapped: false, cell }
    }
}

/// Single-threaded handle to a level, which may be shared by several caches
pub type SharedLevel = Rc<RefCell<CacheLevel>>;

/// A single set-associative cache level.
///
/// Blocks live in one flat arena. Set `s` owns the slots `s * blocks_per_set .. (s + 1) * blocks_per_set`
/// and a block address always maps to set `block_address % num_sets`. A map from block address to
/// slot makes lookups constant time.
#[derive(Debug, Clone)]
pub struct CacheLevel {
    depth: usize,
    num_sets: usize,
    blocks_per_set: usize,
    block_size: u64,
    write_policy: WritePolicy,
    blocks: Vec<CacheBlock>,
    lookup: HashMap<u64, usize>,
}

impl CacheLevel {
    /// Creates an empty level
    ///
    /// # Arguments
    ///
    /// * `depth`: Where the level sits in its cache, 0 being closest to the processor. Only used to
    /// report errors
    /// * `num_blocks`: The number of blocks the level holds
    /// * `associativity`: The number of sets the blocks are split into. Must divide `num_blocks`
    /// * `block_size`: The block size of the enclosing cache, in bytes
    /// * `write_policy`: How the level handles writes
    ///
    /// returns: Result<CacheLevel, ConfigError>
    pub fn new(
        depth: usize,
        num_blocks: u64,
        associativity: u64,
        block_size: u64,
        write_policy: WritePolicy,
    ) -> Result<Self, ConfigError> {
        if num_blocks == 0 || associativity == 0 {
            return Err(ConfigError::EmptyLevel { level: depth });
        }
        if num_blocks % associativity != 0 {
            return Err(ConfigError::UnevenSets { level: depth, num_blocks, associativity });
        }
        let num_blocks = num_blocks as usize;
        let num_sets = associativity as usize;
        Ok(Self {
            depth,
            num_sets,
            blocks_per_set: num_blocks / num_sets,
            block_size,
            write_policy,
            blocks: (0..num_blocks).map(CacheBlock::unmapped).collect(),
            lookup: HashMap::with_capacity(num_blocks),
        })
    }

    pub fn into_shared(self) -> SharedLevel {
        Rc::new(RefCell::new(self))
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    pub fn blocks_per_set(&self) -> usize {
        self.blocks_per_set
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn size_bytes(&self) -> u64 {
        self.blocks.len() as u64 * self.block_size
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn blocks(&self) -> &[CacheBlock] {
        &self.blocks
    }

    pub fn block(&self, cell: usize) -> Result<&CacheBlock, PreconditionViolation> {
        self.blocks.get(cell).ok_or(PreconditionViolation::CellOutOfRange {
            level: self.depth,
            cell,
            num_blocks: self.blocks.len(),
        })
    }

    /// The set a block address maps to
    pub fn set_index(&self, block_address: u64) -> usize {
        (block_address % self.num_sets as u64) as usize
    }

    /// The slots making up `set`
    pub fn set_cells(&self, set: usize) -> Range<usize> {
        let start = set * self.blocks_per_set;
        start..start + self.blocks_per_set
    }

    /// Finds the slot holding `block_address`, if the level holds it
    pub fn find(&self, block_address: u64) -> Option<usize> {
        self.lookup.get(&block_address).copied()
    }

    /// The lowest unmapped slot of `set`
    pub fn free_cell(&self, set: usize) -> Option<usize> {
        self.set_cells(set).find(|cell| !self.blocks[*cell].mapped)
    }

    pub fn mapped_in_set(&self, set: usize) -> usize {
        self.blocks[self.set_cells(set)].iter().filter(|block| block.mapped).count()
    }

    /// Places `block_address` into `cell`, clean. Whatever the cell held before is returned, and is no
    /// longer findable in this level
    ///
    /// # Arguments
    ///
    /// * `cell`: A slot in the block's set, either unmapped or chosen as a victim. Any other slot is
    /// rejected
    /// * `block_address`: A block not already present in the level
    ///
    /// returns: Result<Option<CacheBlock>, PreconditionViolation>, the displaced block if the cell
    /// was mapped
    pub fn install(&mut self, cell: usize, block_address: u64) -> Result<Option<CacheBlock>, PreconditionViolation> {
        if self.lookup.contains_key(&block_address) {
            return Err(PreconditionViolation::AllocateExisting { level: self.depth, block_address });
        }
        let set = self.set_index(block_address);
        if !self.set_cells(set).contains(&cell) {
            return Err(PreconditionViolation::CellOutsideSet { level: self.depth, block_address, set, cell });
        }
        let incoming = CacheBlock { block_address, dirty: false, mapped: true, cell };
        let outgoing = std::mem::replace(&mut self.blocks[cell], incoming);
        self.lookup.insert(block_address, cell);
        if outgoing.mapped {
            self.lookup.remove(&outgoing.block_address);
            Ok(Some(outgoing))
        } else {
            Ok(None)
        }
    }

    /// Reads a present block, returning its slot
    pub fn read(&self, block_address: u64) -> Result<usize, PreconditionViolation> {
        self.find(block_address)
            .ok_or(PreconditionViolation::BlockNotPresent { level: self.depth, block_address })
    }

    /// Writes to a present block, marking it dirty and returning its slot
    pub fn write(&mut self, block_address: u64) -> Result<usize, PreconditionViolation> {
        let cell = self.read(block_address)?;
        self.blocks[cell].dirty = true;
        Ok(cell)
    }

    /// Unmaps every block
    pub fn reset(&mut self) {
        self.blocks.iter_mut().enumerate().for_each(|(cell, block)| *block = CacheBlock::unmapped(cell));
        self.lookup.clear();
    }

    /// Replaces the level's contents with `blocks`, which must have one entry per slot
    pub fn restore(&mut self, blocks: &[CacheBlock]) -> Result<(), PreconditionViolation> {
        if blocks.len() != self.blocks.len() {
            return Err(PreconditionViolation::SnapshotLevelSize {
                level: self.depth,
                snapshot: blocks.len(),
                cache: self.blocks.len(),
            });
        }
        self.lookup.clear();
        for (cell, (slot, block)) in self.blocks.iter_mut().zip(blocks).enumerate() {
            *slot = CacheBlock { cell, ..block.clone() };
            if slot.mapped {
                self.lookup.insert(slot.block_address, cell);
            }
        }
        Ok(())
    }
}
