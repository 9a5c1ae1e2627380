use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::cache_set::CacheSet;
use crate::error::{CacheResult, EndOfTrace};
use crate::events::CacheEvent;
use crate::replacement_policies::ApproximationStats;
use crate::trace::{MemoryAccess, Operation, SharedTrace};

/// Drives caches over a trace and tallies what happened.
///
/// Every access is given to every cache in turn. It supports calling simulate multiple times, for
/// example after seeking the trace, and will keep adding to the results and the time taken.
pub struct Simulator {
    caches: CacheSet,
    trace: SharedTrace,
    result: SimulationResult,
    simulation_time: Duration,
}

/// The result of a simulation run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationResult {
    pub accesses: u64,
    pub caches: Vec<CacheTally>,
}

/// Totals for one cache
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheTally {
    pub replacement_policy: String,
    pub levels: Vec<LevelTally>,
    pub main_memory_reads: u64,
    pub main_memory_writes: u64,
    /// Only present for the approximate policies
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approximation: Option<ApproximationStats>,
}

/// Totals for one level of a cache
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelTally {
    pub hits: u64,
    /// Blocks brought into the level, whether by a load, a store or a write back
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

impl CacheTally {
    fn new(cache: &Cache) -> Self {
        Self {
            replacement_policy: cache.replacement_policy().name().to_string(),
            levels: vec![LevelTally::default(); cache.num_levels()],
            ..Self::default()
        }
    }

    fn record(&mut self, events: &[CacheEvent]) {
        let memory = self.levels.len();
        for event in events {
            match event {
                CacheEvent::Hit(hit) if hit.level == memory => match hit.op {
                    Operation::Read => self.main_memory_reads += 1,
                    Operation::Write => self.main_memory_writes += 1,
                },
                CacheEvent::Hit(hit) => self.levels[hit.level].hits += 1,
                CacheEvent::Entrance(entrance) => self.levels[entrance.level].misses += 1,
                CacheEvent::Eviction(eviction) => {
                    let level = &mut self.levels[eviction.level];
                    level.evictions += 1;
                    if eviction.writeback {
                        level.writebacks += 1;
                    }
                }
            }
        }
    }
}

impl Simulator {
    /// Creates a simulator for a single cache
    ///
    /// # Arguments
    ///
    /// * `cache`: The cache to drive
    /// * `trace`: The trace to read. Must be the same trace any OPT or PES policy in the cache was
    /// built with
    ///
    /// returns: Simulator
    pub fn new(cache: Cache, trace: SharedTrace) -> Self {
        Self::for_set(CacheSet::from(cache), trace)
    }

    /// Creates a simulator giving every access to every cache of a set
    pub fn for_set(caches: CacheSet, trace: SharedTrace) -> Self {
        let result = SimulationResult { accesses: 0, caches: caches.caches().iter().map(CacheTally::new).collect() };
        Self { caches, trace, result, simulation_time: Duration::new(0, 0) }
    }

    /// Simulates one access, returning it, or `None` once the trace is exhausted
    pub fn step(&mut self) -> CacheResult<Option<MemoryAccess>> {
        let access = match self.trace.borrow_mut().next_record() {
            Ok(access) => access,
            Err(EndOfTrace) => return Ok(None),
        };
        for (cache, tally) in self.caches.caches_mut().iter_mut().zip(&mut self.result.caches) {
            cache.access(access)?;
            tally.record(cache.events());
        }
        self.result.accesses += 1;
        Ok(Some(access))
    }

    /// Simulates the rest of the trace
    pub fn simulate(&mut self) -> CacheResult<&SimulationResult> {
        let start = Instant::now();
        let outcome = self.run();
        self.simulation_time += start.elapsed();
        for (cache, tally) in self.caches.caches().iter().zip(&mut self.result.caches) {
            tally.approximation = cache.replacement_policy().approximation_stats();
        }
        outcome?;
        info!("Simulated {} accesses in {:?}", self.result.accesses, self.simulation_time);
        Ok(&self.result)
    }

    fn run(&mut self) -> CacheResult<()> {
        while self.step()?.is_some() {}
        Ok(())
    }

    pub fn result(&self) -> &SimulationResult {
        &self.result
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    /// Gets the wall-clock execution time for processing
    pub fn get_execution_time(&self) -> &Duration {
        &self.simulation_time
    }

    pub fn into_caches(self) -> CacheSet {
        self.caches
    }
}
