use crate::cache::Cache;
use crate::clock::ModtimeTable;
use crate::config::ReplacementPolicyConfig;
use crate::error::{CacheError, PreconditionViolation};
use crate::level::{CacheLevel, WritePolicy};
use crate::replacement_policies::{ApproximationStats, ReplacementPolicy};
use crate::test::{count_memory_accesses, streams_for};
use crate::trace::{MemoryAccess, SharedTrace, Trace};
use crate::util::{cyclic_trace, random_trace};

const BLOCK_SIZE: u64 = 16;

/// Runs `accesses` through a single fully associative level of `capacity` blocks
fn misses_with(policy: ReplacementPolicyConfig, accesses: &[MemoryAccess], capacity: u64) -> usize {
    let trace = Trace::new(accesses.to_vec()).into_shared();
    let mut builder = Cache::builder(BLOCK_SIZE)
        .level(capacity, 1, WritePolicy::WriteBack)
        .replacement_policy(policy)
        .random_seed(42)
        .lookahead(accesses.len())
        .trace(trace.clone());
    if matches!(policy, ReplacementPolicyConfig::Opt | ReplacementPolicyConfig::Pes) {
        builder = builder.block_streams(streams_for(accesses, BLOCK_SIZE, 4));
    }
    let mut cache = builder.build().unwrap();
    count_memory_accesses(&mut cache, &trace)
}

#[test]
fn lru_thrashes_on_a_cycle_one_larger_than_the_cache() {
    let accesses = cyclic_trace(5, 10, BLOCK_SIZE);
    assert_eq!(misses_with(ReplacementPolicyConfig::Lru, &accesses, 4), 50);
}

#[test]
fn opt_beats_every_other_policy_on_a_cycle() {
    let accesses = cyclic_trace(5, 10, BLOCK_SIZE);
    let opt = misses_with(ReplacementPolicyConfig::Opt, &accesses, 4);
    assert!(opt < misses_with(ReplacementPolicyConfig::Lru, &accesses, 4));
    assert!(opt <= misses_with(ReplacementPolicyConfig::Mru, &accesses, 4));
    assert!(opt <= misses_with(ReplacementPolicyConfig::Random, &accesses, 4));
    assert!(opt <= misses_with(ReplacementPolicyConfig::Pes, &accesses, 4));
}

#[test]
fn opt_is_never_beaten_on_random_traces() {
    for seed in 0..5 {
        let accesses = random_trace(400, 12, BLOCK_SIZE, 0.0, seed);
        let opt = misses_with(ReplacementPolicyConfig::Opt, &accesses, 4);
        for other in [ReplacementPolicyConfig::Lru, ReplacementPolicyConfig::Mru, ReplacementPolicyConfig::Random] {
            assert!(opt <= misses_with(other, &accesses, 4), "OPT lost to {other:?} with seed {seed}");
        }
        assert!(opt <= misses_with(ReplacementPolicyConfig::Pes, &accesses, 4));
    }
}

#[test]
fn approx_opt_with_full_lookahead_matches_opt() {
    for seed in 10..13 {
        let accesses = random_trace(300, 10, BLOCK_SIZE, 0.0, seed);
        assert_eq!(
            misses_with(ReplacementPolicyConfig::ApproxOpt, &accesses, 4),
            misses_with(ReplacementPolicyConfig::Opt, &accesses, 4)
        );
    }
}

#[test]
fn random_is_reproducible_with_a_seed() {
    let accesses = random_trace(500, 20, BLOCK_SIZE, 0.2, 5);
    assert_eq!(
        misses_with(ReplacementPolicyConfig::Random, &accesses, 4),
        misses_with(ReplacementPolicyConfig::Random, &accesses, 4)
    );
}

fn approximate_cache(policy: ReplacementPolicyConfig, blocks: &[u64], window: usize) -> (Cache, SharedTrace) {
    let accesses: Vec<MemoryAccess> = blocks.iter().map(|block| MemoryAccess::read(block * BLOCK_SIZE)).collect();
    let trace = Trace::new(accesses).into_shared();
    let cache = Cache::builder(BLOCK_SIZE)
        .level(2, 1, WritePolicy::WriteBack)
        .replacement_policy(policy)
        .lookahead(window)
        .trace(trace.clone())
        .build()
        .unwrap();
    (cache, trace)
}

#[test]
fn approx_opt_resolves_within_the_window() {
    let (mut cache, trace) = approximate_cache(ReplacementPolicyConfig::ApproxOpt, &[0, 1, 2, 0], 10);
    assert_eq!(count_memory_accesses(&mut cache, &trace), 3);
    assert_eq!(
        cache.replacement_policy().approximation_stats(),
        Some(ApproximationStats { decisions: 1, unresolved: 0 })
    );
}

#[test]
fn approx_pes_evicts_the_first_block_seen() {
    let (mut cache, trace) = approximate_cache(ReplacementPolicyConfig::ApproxPes, &[0, 1, 2, 0], 10);
    // Block 0 is evicted for block 2, so the final access misses and nothing is left to look at
    assert_eq!(count_memory_accesses(&mut cache, &trace), 4);
    assert_eq!(
        cache.replacement_policy().approximation_stats(),
        Some(ApproximationStats { decisions: 2, unresolved: 1 })
    );
}

#[test]
fn unresolved_approximations_are_counted() {
    for policy in [ReplacementPolicyConfig::ApproxOpt, ReplacementPolicyConfig::ApproxPes] {
        let (mut cache, trace) = approximate_cache(policy, &[0, 1, 2, 3], 1);
        count_memory_accesses(&mut cache, &trace);
        assert_eq!(
            cache.replacement_policy().approximation_stats(),
            Some(ApproximationStats { decisions: 2, unresolved: 2 }),
            "{policy:?}"
        );
        // Unresolved decisions take the lowest cell, so block 3 replaced block 2 in cell 0
        let level = cache.level(0).unwrap().borrow();
        assert_eq!(level.find(3), Some(0));
        assert_eq!(level.find(1), Some(1));
    }
}

#[test]
fn exact_policies_report_no_approximation_stats() {
    assert_eq!(ReplacementPolicy::Lru.approximation_stats(), None);
    assert_eq!(ReplacementPolicy::random(Some(1)).approximation_stats(), None);
}

#[test]
fn lru_ties_go_to_the_lowest_cell() {
    let mut level = CacheLevel::new(0, 4, 1, BLOCK_SIZE, WritePolicy::WriteBack).unwrap();
    for block in 0..4 {
        level.install(block as usize, block).unwrap();
    }
    // Nothing has been touched, every block reads as time 0
    let clock = ModtimeTable::new();
    let victim = ReplacementPolicy::Lru.select_victim(&level, 0, &clock).unwrap();
    assert_eq!(victim.cell, 0);
    assert!(victim.should_writeback);
    let victim = ReplacementPolicy::Mru.select_victim(&level, 0, &clock).unwrap();
    assert_eq!(victim.cell, 0);
}

#[test]
fn victims_come_from_full_sets_only() {
    let mut level = CacheLevel::new(0, 4, 2, BLOCK_SIZE, WritePolicy::WriteThrough).unwrap();
    level.install(0, 0).unwrap();
    let result = ReplacementPolicy::Lru.select_victim(&level, 0, &ModtimeTable::new());
    assert!(matches!(
        result,
        Err(CacheError::Precondition(PreconditionViolation::EvictionWithUnmappedBlocks { level: 0, set: 0, cell: 1 }))
    ));
    level.install(1, 2).unwrap();
    let victim = ReplacementPolicy::Lru.select_victim(&level, 0, &ModtimeTable::new()).unwrap();
    assert!(!victim.should_writeback);
}
