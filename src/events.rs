use serde::{Deserialize, Serialize};

use crate::trace::Operation;

/// A block was found at `level`. When `level` equals the number of cache levels the access went all
/// the way to main memory, and `cell` is 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    pub address: u64,
    pub level: usize,
    pub cell: usize,
    pub op: Operation,
}

/// A block was pushed out of `level` to make room for another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub level: usize,
    pub block_address: u64,
    /// Whether the block was written back to the next level
    pub writeback: bool,
    pub dirty: bool,
}

/// A block was placed into `cell` of `level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntranceRecord {
    pub address: u64,
    pub level: usize,
    pub cell: usize,
}

/// Everything that happened during one load or store, in the order it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEvent {
    Hit(HitRecord),
    Eviction(EvictionRecord),
    Entrance(EntranceRecord),
}

/// The ordered events of the most recent access, with a view per kind of event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    events: Vec<CacheEvent>,
}

impl EventLog {
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn push(&mut self, event: CacheEvent) {
        self.events.push(event);
    }

    pub fn all(&self) -> &[CacheEvent] {
        &self.events
    }

    pub fn hits(&self) -> impl Iterator<Item = &HitRecord> + '_ {
        self.events.iter().filter_map(|event| match event {
            CacheEvent::Hit(hit) => Some(hit),
            _ => None,
        })
    }

    pub fn evictions(&self) -> impl Iterator<Item = &EvictionRecord> + '_ {
        self.events.iter().filter_map(|event| match event {
            CacheEvent::Eviction(eviction) => Some(eviction),
            _ => None,
        })
    }

    pub fn entrances(&self) -> impl Iterator<Item = &EntranceRecord> + '_ {
        self.events.iter().filter_map(|event| match event {
            CacheEvent::Entrance(entrance) => Some(entrance),
            _ => None,
        })
    }
}
