use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Logical clock recording when each block address was last touched.
///
/// Time only moves forward: every touch takes a fresh, strictly larger stamp. A block address that
/// was never touched reads as time 0, which is older than every stamp handed out.
///
/// Stamps are keyed by block address rather than by cell, so a single table can be shared by every
/// level of a cache, and by every cache of a cache set.
#[derive(Debug, Clone, Default)]
pub struct ModtimeTable {
    time: u64,
    stamps: HashMap<u64, u64>,
}

/// Single-threaded handle to a clock shared between caches
pub type SharedClock = Rc<RefCell<ModtimeTable>>;

impl ModtimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedClock {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Stamps `block_address` with the next logical time, returning that time
    ///
    /// ```
    /// use cachesim::clock::ModtimeTable;
    /// let mut clock = ModtimeTable::new();
    /// let first = clock.touch(7);
    /// let second = clock.touch(3);
    /// assert!(first < second);
    /// assert_eq!(clock.modtime(7), first);
    /// assert_eq!(clock.modtime(12), 0);
    /// ```
    pub fn touch(&mut self, block_address: u64) -> u64 {
        self.time += 1;
        self.stamps.insert(block_address, self.time);
        self.time
    }

    pub fn modtime(&self, block_address: u64) -> u64 {
        self.stamps.get(&block_address).copied().unwrap_or(0)
    }

    /// The most recently handed out stamp
    pub fn now(&self) -> u64 {
        self.time
    }
}
