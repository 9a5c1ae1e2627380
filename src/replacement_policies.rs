use std::fmt::{Display, Formatter};

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::blockstream::SharedBlockStreams;
use crate::clock::ModtimeTable;
use crate::config::ReplacementPolicyConfig;
use crate::error::{CacheResult, PreconditionViolation};
use crate::level::{CacheLevel, WritePolicy};
use crate::trace::SharedTrace;

/// Default number of upcoming accesses the approximate policies can see
pub const DEFAULT_LOOKAHEAD: usize = 10 * 1024;

/// The block chosen to make room in a full set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub cell: usize,
    /// Whether a dirty victim must be written to the next level first
    pub should_writeback: bool,
}

/// How well the approximate policies managed with the lookahead they had
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproximationStats {
    pub decisions: u64,
    /// Decisions the window couldn't settle, where the lowest candidate cell was taken instead
    pub unresolved: u64,
}

/// Chooses which block of a full set to evict.
///
/// Ties always go to the lowest cell.
pub enum ReplacementPolicy {
    /// Evicts the least recently touched block
    Lru,
    /// Evicts the most recently touched block
    Mru,
    /// Evicts a uniformly random block
    Random(StdRng),
    /// Evicts the block whose next use is furthest away, or never comes
    Opt { trace: SharedTrace, streams: SharedBlockStreams },
    /// Evicts the block whose next use is nearest
    Pes { trace: SharedTrace, streams: SharedBlockStreams },
    /// [ReplacementPolicy::Opt] limited to what the trace source can peek
    ApproxOpt { trace: SharedTrace, window: usize, stats: ApproximationStats },
    /// [ReplacementPolicy::Pes] limited to what the trace source can peek
    ApproxPes { trace: SharedTrace, window: usize, stats: ApproximationStats },
}

impl ReplacementPolicy {
    /// A random policy, reproducible when given a seed
    pub fn random(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::Random(StdRng::seed_from_u64(seed)),
            None => Self::Random(StdRng::from_entropy()),
        }
    }

    pub fn kind(&self) -> ReplacementPolicyConfig {
        match self {
            Self::Lru => ReplacementPolicyConfig::Lru,
            Self::Mru => ReplacementPolicyConfig::Mru,
            Self::Random(_) => ReplacementPolicyConfig::Random,
            Self::Opt { .. } => ReplacementPolicyConfig::Opt,
            Self::Pes { .. } => ReplacementPolicyConfig::Pes,
            Self::ApproxOpt { .. } => ReplacementPolicyConfig::ApproxOpt,
            Self::ApproxPes { .. } => ReplacementPolicyConfig::ApproxPes,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Decision counts for the approximate policies, `None` for every other policy
    pub fn approximation_stats(&self) -> Option<ApproximationStats> {
        match self {
            Self::ApproxOpt { stats, .. } | Self::ApproxPes { stats, .. } => Some(*stats),
            _ => None,
        }
    }

    /// Chooses a victim in a full set
    ///
    /// # Arguments
    ///
    /// * `level`: The level needing space
    /// * `set`: The set needing space. Every cell in it must be mapped
    /// * `clock`: Last touch times of every block
    ///
    /// returns: CacheResult<Victim>
    pub fn select_victim(&mut self, level: &CacheLevel, set: usize, clock: &ModtimeTable) -> CacheResult<Victim> {
        let mut candidates: Vec<(usize, u64)> = Vec::with_capacity(level.blocks_per_set());
        for cell in level.set_cells(set) {
            let block = level.block(cell)?;
            if !block.mapped {
                return Err(PreconditionViolation::EvictionWithUnmappedBlocks { level: level.depth(), set, cell }.into());
            }
            candidates.push((cell, block.block_address));
        }
        let furthest = matches!(self, Self::Opt { .. });

        let cell = match self {
            Self::Lru => first_by(&candidates, |block| clock.modtime(block), |a, b| a < b),
            Self::Mru => first_by(&candidates, |block| clock.modtime(block), |a, b| a > b),
            Self::Random(rng) => rng.gen_range(level.set_cells(set)),
            Self::Opt { trace, streams } | Self::Pes { trace, streams } => {
                let position = trace.borrow().current_position();
                let mut streams = streams.borrow_mut();
                let mut best: Option<(usize, u64)> = None;
                for (cell, block) in candidates {
                    // Never is further than anything
                    let next = streams.next(block, position)?.unwrap_or(u64::MAX);
                    let better = match best {
                        None => true,
                        Some((_, best_next)) if furthest => next > best_next,
                        Some((_, best_next)) => next < best_next,
                    };
                    if better {
                        best = Some((cell, next));
                    }
                }
                best.map(|(cell, _)| cell).unwrap_or(level.set_cells(set).start)
            }
            Self::ApproxOpt { trace, window, stats } => {
                let mut remaining = candidates;
                let trace = trace.borrow();
                for access in trace.peek_ahead(*window) {
                    if remaining.len() == 1 {
                        break;
                    }
                    let block = access.block_address(level.block_size());
                    remaining.retain(|(_, candidate)| *candidate != block);
                }
                stats.decisions += 1;
                // Sets are never empty, and only one candidate is removed per access
                let (cell, block) = remaining[0];
                if remaining.len() > 1 {
                    stats.unresolved += 1;
                    warn!(
                        "ApproxOPT couldn't separate {} candidates in L{} set {set} within {window} accesses, evicting cell {cell}",
                        remaining.len(),
                        level.depth() + 1
                    );
                } else {
                    debug!("ApproxOPT evicts block {block:#x} from L{} cell {cell}", level.depth() + 1);
                }
                cell
            }
            Self::ApproxPes { trace, window, stats } => {
                let trace = trace.borrow();
                let seen = trace.peek_ahead(*window).iter().find_map(|access| {
                    let block = access.block_address(level.block_size());
                    candidates.iter().find(|(_, candidate)| *candidate == block)
                });
                stats.decisions += 1;
                match seen {
                    Some((cell, block)) => {
                        debug!("ApproxPES evicts block {block:#x} from L{} cell {cell}", level.depth() + 1);
                        *cell
                    }
                    None => {
                        stats.unresolved += 1;
                        let cell = level.set_cells(set).start;
                        warn!(
                            "ApproxPES saw none of L{} set {set} within {window} accesses, evicting cell {cell}",
                            level.depth() + 1
                        );
                        cell
                    }
                }
            }
        };
        Ok(Victim { cell, should_writeback: level.write_policy() == WritePolicy::WriteBack })
    }
}

impl Display for ReplacementPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The first candidate whose key beats every earlier one, so ties go to the lowest cell
fn first_by(
    candidates: &[(usize, u64)],
    key: impl Fn(u64) -> u64,
    beats: impl Fn(u64, u64) -> bool,
) -> usize {
    let mut best: Option<(usize, u64)> = None;
    for &(cell, block) in candidates {
        let value = key(block);
        match best {
            Some((_, best_value)) if !beats(value, best_value) => {}
            _ => best = Some((cell, value)),
        }
    }
    best.map(|(cell, _)| cell).unwrap_or_default()
}
