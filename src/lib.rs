//! # CacheSim
//!
//! CacheSim simulates multi-level cache hierarchies over memory traces
//!
//! A cache is an ordered list of set-associative levels with write-back or write-through policies,
//! and one of several replacement policies, including Belady's optimal policy and its pessimal
//! dual. Every load and store produces a list of hit, eviction and entrance events, which the
//! simulator tallies or a caller can inspect directly.
//!
//! The exact optimal policies read the future from a block stream file, built from the trace once
//! up front, through a bounded pool of file handles.

/// Contains the cache hierarchy, its load and store logic, and snapshots of its contents
pub mod cache;

/// Contains caches grouped together, sharing a clock and possibly levels
pub mod cache_set;

/// Contains the block stream file format, the reader used by the OPT and PES policies, and the file
/// handle pool behind it
pub mod blockstream;

/// Contains the logical clock used for recency
pub mod clock;

/// Contains definitions for the JSON input format, and a builder for constructing caches in code
pub mod config;

/// Contains the error types
pub mod error;

/// Contains the events produced by loads and stores
pub mod events;

mod io;

/// Contains a single cache level
pub mod level;

/// Contains the provided replacement policies
pub mod replacement_policies;

/// Contains the simulator used to run caches over a whole trace
pub mod simulator;

/// Contains memory accesses, the trace source interface, and trace file readers
pub mod trace;

#[cfg(test)]
mod test;

/// Contains utilities for running tests and benchmarks.
pub mod util;
