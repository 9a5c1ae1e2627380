use std::rc::Rc;

use log::info;

use crate::cache::Cache;
use crate::clock::SharedClock;
use crate::error::ConfigError;
use crate::level::SharedLevel;

/// A group of caches, such as the private hierarchies of several cores, that share one logical
/// clock and may share level instances.
pub struct CacheSet {
    caches: Vec<Cache>,
    clock: SharedClock,
}

impl CacheSet {
    /// Groups caches that were all built with `clock` and a common block size
    pub fn new(caches: Vec<Cache>, clock: SharedClock) -> Result<Self, ConfigError> {
        if let Some(first) = caches.first() {
            let expected = first.block_size();
            if let Some(other) = caches.iter().find(|cache| cache.block_size() != expected) {
                return Err(ConfigError::BlockSizeMismatch { expected, cache: other.block_size() });
            }
        }
        info!("Created a cache set of {} caches", caches.len());
        Ok(Self { caches, clock })
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn caches_mut(&mut self) -> &mut [Cache] {
        &mut self.caches
    }

    pub fn cache(&self, index: usize) -> Option<&Cache> {
        self.caches.get(index)
    }

    pub fn cache_mut(&mut self, index: usize) -> Option<&mut Cache> {
        self.caches.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The distinct levels at each depth across every cache, in order of first appearance. A level
    /// shared by several caches appears once
    pub fn unified_structure(&self) -> Vec<Vec<SharedLevel>> {
        let depth = self.caches.iter().map(Cache::num_levels).max().unwrap_or(0);
        (0..depth)
            .map(|depth| {
                let mut unique: Vec<SharedLevel> = Vec::new();
                for level in self.caches.iter().filter_map(|cache| cache.level(depth)) {
                    if !unique.iter().any(|seen| Rc::ptr_eq(seen, level)) {
                        unique.push(level.clone());
                    }
                }
                unique
            })
            .collect()
    }
}

impl From<Cache> for CacheSet {
    fn from(cache: Cache) -> Self {
        let clock = cache.clock().clone();
        Self { caches: vec![cache], clock }
    }
}
