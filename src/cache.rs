use std::fmt::{Display, Formatter};

use log::info;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::config::CacheBuilder;
use crate::error::{CacheError, CacheResult, ConfigError, PreconditionViolation};
use crate::events::{CacheEvent, EntranceRecord, EventLog, EvictionRecord, HitRecord};
use crate::level::{CacheBlock, SharedLevel, WritePolicy};
use crate::replacement_policies::ReplacementPolicy;
use crate::trace::{MemoryAccess, Operation};

/// What a store does when the block isn't in the level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMissPolicy {
    /// Bring the block into the level, then write it
    #[default]
    #[serde(alias = "writeallocate", alias = "write_allocate")]
    WriteAllocate,
    /// Write around the level. Not supported by the engine, stores that need it fail
    #[serde(rename = "NoWriteAllocate", alias = "WriteNoAllocate", alias = "nowriteallocate", alias = "no_write_allocate")]
    WriteNoAllocate,
}

/// The contents of every level of a cache, without the clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub levels: Vec<Vec<CacheBlock>>,
}

/// A cache hierarchy: an ordered list of levels, closest to the processor first, with main memory
/// implicitly behind the last one.
///
/// Every load and store records what happened as a list of events, which is replaced on the next
/// access. Level `n` in an event, where `n` is the number of levels, means main memory.
pub struct Cache {
    levels: Vec<SharedLevel>,
    block_size: u64,
    write_miss_policy: WriteMissPolicy,
    policy: ReplacementPolicy,
    clock: SharedClock,
    events: EventLog,
}

impl Cache {
    /// Starts building a cache with the given block size
    ///
    /// ```
    /// use cachesim::cache::Cache;
    /// use cachesim::level::WritePolicy;
    /// let mut cache = Cache::builder(16)
    ///     .level(4, 2, WritePolicy::WriteBack)
    ///     .level(16, 4, WritePolicy::WriteBack)
    ///     .build()
    ///     .unwrap();
    /// cache.load(0x40).unwrap();
    /// assert_eq!(cache.hits().next().unwrap().level, 2);
    /// cache.load(0x48).unwrap();
    /// assert_eq!(cache.hits().next().unwrap().level, 0);
    /// ```
    pub fn builder(block_size: u64) -> CacheBuilder {
        CacheBuilder::new(block_size)
    }

    /// Assembles a cache from already built parts
    ///
    /// # Arguments
    ///
    /// * `block_size`: Block size in bytes, shared by every level
    /// * `levels`: The levels, closest to the processor first. Each must be strictly larger than the
    /// one before it
    /// * `write_miss_policy`: What stores do on a miss
    /// * `policy`: How victims are chosen in every level
    /// * `clock`: The logical clock, possibly shared with other caches
    ///
    /// returns: Result<Cache, ConfigError>
    pub fn new(
        block_size: u64,
        levels: Vec<SharedLevel>,
        write_miss_policy: WriteMissPolicy,
        policy: ReplacementPolicy,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        if block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        let mut previous: Option<u64> = None;
        for (depth, level) in levels.iter().enumerate() {
            let level = level.borrow();
            if level.block_size() != block_size {
                return Err(ConfigError::BlockSizeMismatch { expected: block_size, cache: level.block_size() });
            }
            let size = level.size_bytes();
            if let Some(previous) = previous.filter(|previous| size <= *previous) {
                return Err(ConfigError::LevelTooSmall { level: depth, size, previous });
            }
            previous = Some(size);
        }
        info!(
            "Created a {}-level cache with {} byte blocks, {} replacement and {:?}",
            levels.len(),
            block_size,
            policy,
            write_miss_policy
        );
        Ok(Self { levels, block_size, write_miss_policy, policy, clock, events: EventLog::default() })
    }

    /// Performs a load or store, depending on the access
    pub fn access(&mut self, access: MemoryAccess) -> CacheResult<()> {
        match access.op {
            Operation::Read => self.load(access.address),
            Operation::Write => self.store(access.address),
        }
    }

    /// Reads `address`.
    ///
    /// The first level holding the block serves the read, or main memory if none do. The block is
    /// then brought into every level above the one that served it.
    pub fn load(&mut self, address: u64) -> CacheResult<()> {
        self.events.clear();
        let block_address = address / self.block_size;
        let found = self
            .levels
            .iter()
            .enumerate()
            .find_map(|(depth, level)| level.borrow().find(block_address).map(|_| depth));
        let served_by = match found {
            Some(depth) => {
                let cell = self.levels[depth].borrow().read(block_address)?;
                self.clock.borrow_mut().touch(block_address);
                self.events.push(CacheEvent::Hit(HitRecord { address, level: depth, cell, op: Operation::Read }));
                depth
            }
            None => {
                let memory = self.levels.len();
                self.events.push(CacheEvent::Hit(HitRecord { address, level: memory, cell: 0, op: Operation::Read }));
                memory
            }
        };
        for depth in 0..served_by {
            self.allocate(depth, address)?;
        }
        Ok(())
    }

    /// Writes `address`, starting at the first level
    pub fn store(&mut self, address: u64) -> CacheResult<()> {
        self.events.clear();
        self.write_at_level(0, address)
    }

    /// Writes `address` into the hierarchy from level `start` down.
    ///
    /// Each level visited is written, allocating the block first if it's missing. A write-back
    /// level absorbs the write; a write-through level passes it on. Passing it on from the last
    /// level writes main memory. Events are appended to those of the current access.
    ///
    /// Under [WriteMissPolicy::WriteNoAllocate] every level visited must already hold the block. This
    /// is checked before any level is written, and the call fails with [CacheError::Unsupported]
    /// otherwise.
    ///
    /// # Arguments
    ///
    /// * `start`: The first level to write. Equal to the number of levels to write main memory
    /// directly
    /// * `address`: The address written
    ///
    /// returns: CacheResult<()>
    pub fn write_at_level(&mut self, start: usize, address: u64) -> CacheResult<()> {
        let memory = self.levels.len();
        if start > memory {
            return Err(PreconditionViolation::LevelOutOfRange { level: start, levels: memory }.into());
        }
        let block_address = address / self.block_size;
        self.check_write_allocation(start, block_address)?;
        for depth in start..memory {
            let present = self.levels[depth].borrow().find(block_address).is_some();
            if !present {
                self.allocate(depth, address)?;
            }
            let (cell, write_policy) = {
                let mut level = self.levels[depth].borrow_mut();
                (level.write(block_address)?, level.write_policy())
            };
            self.clock.borrow_mut().touch(block_address);
            self.events.push(CacheEvent::Hit(HitRecord { address, level: depth, cell, op: Operation::Write }));
            if write_policy == WritePolicy::WriteBack {
                return Ok(());
            }
        }
        self.events.push(CacheEvent::Hit(HitRecord { address, level: memory, cell: 0, op: Operation::Write }));
        Ok(())
    }

    /// Fails if writing `block_address` from level `start` would have to allocate it somewhere
    /// while the cache doesn't allocate on write misses. Nothing is changed either way
    fn check_write_allocation(&self, start: usize, block_address: u64) -> CacheResult<()> {
        if self.write_miss_policy != WriteMissPolicy::WriteNoAllocate {
            return Ok(());
        }
        for level in self.levels.iter().skip(start) {
            let level = level.borrow();
            if level.find(block_address).is_none() {
                return Err(CacheError::Unsupported("stores under the write-no-allocate policy"));
            }
            if level.write_policy() == WritePolicy::WriteBack {
                break;
            }
        }
        Ok(())
    }

    /// Brings the block holding `address` into level `depth`.
    ///
    /// A free cell in the block's set is used if there is one; otherwise the replacement policy
    /// picks a victim, which is written to the next level first if it's dirty and the level is
    /// write-back. If that write would need a write-no-allocate miss, the error is returned before
    /// the victim is evicted.
    ///
    /// # Arguments
    ///
    /// * `depth`: The level to allocate in. The block must not already be there
    /// * `address`: Any address in the block
    ///
    /// returns: CacheResult<usize>, the cell the block was placed in
    pub fn allocate(&mut self, depth: usize, address: u64) -> CacheResult<usize> {
        let level_handle = self
            .levels
            .get(depth)
            .ok_or(PreconditionViolation::LevelOutOfRange { level: depth, levels: self.levels.len() })?
            .clone();
        let block_address = address / self.block_size;
        let (cell, victim) = {
            let level = level_handle.borrow();
            if level.find(block_address).is_some() {
                return Err(PreconditionViolation::AllocateExisting { level: depth, block_address }.into());
            }
            let set = level.set_index(block_address);
            match level.free_cell(set) {
                Some(cell) => (cell, None),
                None => {
                    let victim = self.policy.select_victim(&level, set, &self.clock.borrow())?;
                    (victim.cell, Some((level.block(victim.cell)?.clone(), victim.should_writeback)))
                }
            }
        };

        if let Some((victim, should_writeback)) = victim {
            let writeback = victim.dirty && should_writeback;
            if writeback {
                // A victim that can't be written back stays where it is
                self.check_write_allocation(depth + 1, victim.block_address)?;
            }
            self.events.push(CacheEvent::Eviction(EvictionRecord {
                level: depth,
                block_address: victim.block_address,
                writeback,
                dirty: victim.dirty,
            }));
            if writeback {
                self.write_at_level(depth + 1, victim.block_address * self.block_size)?;
            }
        }

        level_handle.borrow_mut().install(cell, block_address)?;
        self.clock.borrow_mut().touch(block_address);
        self.events.push(CacheEvent::Entrance(EntranceRecord { address, level: depth, cell }));
        Ok(cell)
    }

    /// Copies the contents of every level
    pub fn state(&self) -> Snapshot {
        Snapshot { levels: self.levels.iter().map(|level| level.borrow().blocks().to_vec()).collect() }
    }

    /// Replaces the contents of every level with a snapshot of the same shape. Nothing is changed
    /// if any level doesn't match
    pub fn set_state(&mut self, snapshot: &Snapshot) -> CacheResult<()> {
        if snapshot.levels.len() != self.levels.len() {
            return Err(PreconditionViolation::SnapshotLevelCount {
                snapshot: snapshot.levels.len(),
                cache: self.levels.len(),
            }
            .into());
        }
        for (depth, (level, blocks)) in self.levels.iter().zip(&snapshot.levels).enumerate() {
            let num_blocks = level.borrow().num_blocks();
            if blocks.len() != num_blocks {
                return Err(PreconditionViolation::SnapshotLevelSize {
                    level: depth,
                    snapshot: blocks.len(),
                    cache: num_blocks,
                }
                .into());
            }
        }
        for (level, blocks) in self.levels.iter().zip(&snapshot.levels) {
            level.borrow_mut().restore(blocks)?;
        }
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, depth: usize) -> Option<&SharedLevel> {
        self.levels.get(depth)
    }

    pub fn levels(&self) -> &[SharedLevel] {
        &self.levels
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn write_miss_policy(&self) -> WriteMissPolicy {
        self.write_miss_policy
    }

    pub fn replacement_policy(&self) -> &ReplacementPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The logical time `block_address` was last touched, 0 if never
    pub fn modtime(&self, block_address: u64) -> u64 {
        self.clock.borrow().modtime(block_address)
    }

    /// Every event of the last access, in order
    pub fn events(&self) -> &[CacheEvent] {
        self.events.all()
    }

    pub fn hits(&self) -> impl Iterator<Item = &HitRecord> + '_ {
        self.events.hits()
    }

    pub fn evictions(&self) -> impl Iterator<Item = &EvictionRecord> + '_ {
        self.events.evictions()
    }

    pub fn entrances(&self) -> impl Iterator<Item = &EntranceRecord> + '_ {
        self.events.entrances()
    }
}

impl Display for Cache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Cache: {} levels, {} byte blocks, {} replacement, {:?}",
            self.levels.len(),
            self.block_size,
            self.policy,
            self.write_miss_policy
        )?;
        for (depth, level) in self.levels.iter().enumerate() {
            let level = level.borrow();
            let mapped = level.blocks().iter().filter(|block| block.mapped).count();
            writeln!(
                f,
                "  L{}: {} bytes, {} blocks in {} sets of {}, {:?}, {} mapped",
                depth + 1,
                level.size_bytes(),
                level.num_blocks(),
                level.num_sets(),
                level.blocks_per_set(),
                level.write_policy(),
                mapped
            )?;
        }
        writeln!(f, "Last access:")?;
        let memory = self.levels.len();
        for event in self.events.all() {
            match event {
                CacheEvent::Hit(hit) if hit.level == memory => {
                    writeln!(f, "  {:?} {:#x} went to main memory", hit.op, hit.address)?
                }
                CacheEvent::Hit(hit) => {
                    writeln!(f, "  {:?} {:#x} hit L{} cell {}", hit.op, hit.address, hit.level + 1, hit.cell)?
                }
                CacheEvent::Eviction(eviction) => writeln!(
                    f,
                    "  Block {:#x} evicted from L{}{}",
                    eviction.block_address,
                    eviction.level + 1,
                    match (eviction.dirty, eviction.writeback) {
                        (true, true) => ", dirty and written back",
                        (true, false) => ", dirty",
                        _ => "",
                    }
                )?,
                CacheEvent::Entrance(entrance) => writeln!(
                    f,
                    "  {:#x} entered L{} cell {}",
                    entrance.address,
                    entrance.level + 1,
                    entrance.cell
                )?,
            }
        }
        Ok(())
    }
}
