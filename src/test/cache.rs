use crate::cache::{Cache, Snapshot, WriteMissPolicy};
use crate::config::{CacheSetSpec, ReplacementPolicyConfig};
use crate::error::{CacheError, PreconditionViolation};
use crate::events::CacheEvent;
use crate::level::{CacheBlock, CacheLevel, WritePolicy};
use crate::test::assert_level_consistent;
use crate::trace::MemoryAccess;
use crate::util::random_trace;

fn small_cache() -> Cache {
    Cache::builder(16)
        .level(4, 2, WritePolicy::WriteBack)
        .level(16, 4, WritePolicy::WriteBack)
        .build()
        .unwrap()
}

fn run(cache: &mut Cache, accesses: &[MemoryAccess]) -> Vec<Vec<CacheEvent>> {
    accesses
        .iter()
        .map(|access| {
            cache.access(*access).unwrap();
            cache.events().to_vec()
        })
        .collect()
}

#[test]
fn load_misses_then_hits() {
    let mut cache = small_cache();
    cache.load(0x1234).unwrap();
    assert_eq!(cache.hits().next().unwrap().level, 2);
    assert_eq!(cache.entrances().count(), 2);

    // Same block, different offset
    cache.load(0x1238).unwrap();
    let hits: Vec<_> = cache.hits().collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, 0);
    assert_eq!(hits[0].address, 0x1238);
    assert_eq!(cache.entrances().count(), 0);
}

#[test]
fn load_fills_only_levels_above_the_hit() {
    let mut cache = Cache::builder(16)
        .level(1, 1, WritePolicy::WriteBack)
        .level(4, 1, WritePolicy::WriteBack)
        .build()
        .unwrap();
    cache.load(0).unwrap();
    cache.load(16).unwrap();
    // Block 0 is now only in L2
    cache.load(0).unwrap();
    assert_eq!(cache.hits().next().unwrap().level, 1);
    let entrance_levels: Vec<usize> = cache.entrances().map(|entrance| entrance.level).collect();
    assert_eq!(entrance_levels, vec![0]);
}

#[test]
fn sets_stay_consistent() {
    let mut cache = small_cache();
    for access in random_trace(2000, 64, 16, 0.3, 7) {
        cache.access(access).unwrap();
    }
    for level in cache.levels() {
        let level = level.borrow();
        assert_level_consistent(&level);
        // 64 blocks over a 4 and a 16 block level, everything is full by now
        assert_eq!(level.blocks().iter().filter(|block| block.mapped).count(), level.num_blocks());
    }
}

#[test]
fn clock_is_bumped_on_every_touch() {
    let mut cache = small_cache();
    cache.load(0).unwrap();
    let after_load = cache.modtime(0);
    assert!(after_load > 0);
    cache.store(0).unwrap();
    assert!(cache.modtime(0) > after_load);
    assert_eq!(cache.modtime(99), 0);
}

#[test]
fn mru_evicts_the_newest_block() {
    let mut cache = Cache::builder(16)
        .level(2, 1, WritePolicy::WriteBack)
        .replacement_policy(ReplacementPolicyConfig::Mru)
        .build()
        .unwrap();
    cache.load(0).unwrap();
    cache.load(16).unwrap();
    cache.load(32).unwrap();
    assert_eq!(cache.evictions().next().unwrap().block_address, 1);
    cache.load(0).unwrap();
    assert_eq!(cache.hits().next().unwrap().level, 0);
    // The hit made block 0 the newest
    cache.load(16).unwrap();
    assert_eq!(cache.evictions().next().unwrap().block_address, 0);
}

#[test]
fn store_hit_marks_block_dirty() {
    let mut cache = small_cache();
    cache.load(0x40).unwrap();
    cache.store(0x40).unwrap();
    let hits: Vec<_> = cache.hits().collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, 0);
    let level = cache.level(0).unwrap().borrow();
    let cell = level.find(4).unwrap();
    assert!(level.block(cell).unwrap().dirty);
}

#[test]
fn no_write_allocate_is_unsupported() {
    let mut cache = Cache::builder(16)
        .level(4, 1, WritePolicy::WriteThrough)
        .level(8, 1, WritePolicy::WriteBack)
        .write_miss_policy(WriteMissPolicy::WriteNoAllocate)
        .build()
        .unwrap();
    assert!(matches!(cache.store(0), Err(CacheError::Unsupported(_))));
    // Stores that don't miss are fine
    cache.load(16).unwrap();
    cache.store(16).unwrap();
    assert_eq!(cache.hits().map(|hit| hit.level).collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn write_no_allocate_store_changes_nothing_on_a_miss_below() {
    let mut cache = Cache::builder(16)
        .level(4, 1, WritePolicy::WriteThrough)
        .level(8, 1, WritePolicy::WriteBack)
        .write_miss_policy(WriteMissPolicy::WriteNoAllocate)
        .build()
        .unwrap();
    // Block 0 in L1 only
    let mut snapshot = cache.state();
    snapshot.levels[0][0] = CacheBlock { block_address: 0, dirty: false, mapped: true, cell: 0 };
    cache.set_state(&snapshot).unwrap();

    assert!(matches!(cache.store(0), Err(CacheError::Unsupported(_))));
    assert!(cache.events().is_empty());
    assert_eq!(cache.state(), snapshot);
}

#[test]
fn blocked_write_back_leaves_the_victim_in_place() {
    let mut set = CacheSetSpec::from_reader(
        r#"{
            "block_size": 16,
            "shared_levels": [
                { "name": "L2", "num_blocks": 2, "associativity": 1, "write_policy": "WriteBack" }
            ],
            "caches": [
                { "write_miss_policy": "NoWriteAllocate", "levels": [
                    { "num_blocks": 1, "associativity": 1, "write_policy": "WriteBack" },
                    { "shared_name": "L2" }
                ]},
                { "levels": [
                    { "num_blocks": 1, "associativity": 1, "write_policy": "WriteBack" },
                    { "shared_name": "L2" }
                ]}
            ]
        }"#
        .as_bytes(),
    )
    .unwrap()
    .build(None, None)
    .unwrap();

    set.cache_mut(0).unwrap().load(0x00).unwrap();
    set.cache_mut(0).unwrap().store(0x00).unwrap();
    // The other core pushes block 0 out of the shared level, leaving the only copy dirty in L1
    set.cache_mut(1).unwrap().load(0x10).unwrap();
    set.cache_mut(1).unwrap().load(0x20).unwrap();
    assert_eq!(set.cache(1).unwrap().evictions().last().unwrap().block_address, 0);

    let core = set.cache_mut(0).unwrap();
    assert!(matches!(core.load(0x30), Err(CacheError::Unsupported(_))));
    assert_eq!(core.hits().map(|hit| hit.level).collect::<Vec<_>>(), vec![2]);
    assert_eq!(core.evictions().count(), 0);
    assert_eq!(core.entrances().count(), 0);

    let level_one = core.level(0).unwrap().borrow();
    assert_eq!(level_one.blocks(), &[CacheBlock { block_address: 0, dirty: true, mapped: true, cell: 0 }]);
    let shared = core.level(1).unwrap().borrow();
    assert!(shared.find(0).is_none());
    assert!(shared.find(2).is_some());
    assert!(shared.find(3).is_none());
}

#[test]
fn level_cells_are_checked() {
    // Two sets of two cells, block 1 maps to set 1
    let mut level = CacheLevel::new(0, 4, 2, 16, WritePolicy::WriteBack).unwrap();
    assert_eq!(
        level.install(0, 1),
        Err(PreconditionViolation::CellOutsideSet { level: 0, block_address: 1, set: 1, cell: 0 })
    );
    assert!(level.find(1).is_none());
    assert_eq!(level.install(3, 1), Ok(None));
    assert_eq!(level.find(1), Some(3));
    assert_eq!(level.block(4), Err(PreconditionViolation::CellOutOfRange { level: 0, cell: 4, num_blocks: 4 }));
    assert!(level.block(3).unwrap().mapped);
}

#[test]
fn allocating_a_present_block_fails() {
    let mut cache = small_cache();
    cache.load(0).unwrap();
    let result = cache.allocate(0, 0);
    assert!(matches!(
        result,
        Err(CacheError::Precondition(PreconditionViolation::AllocateExisting { level: 0, block_address: 0 }))
    ));
}

#[test]
fn level_access_preconditions() {
    let mut cache = small_cache();
    let mut level = cache.level(0).unwrap().borrow_mut();
    assert_eq!(level.read(3), Err(PreconditionViolation::BlockNotPresent { level: 0, block_address: 3 }));
    assert_eq!(level.write(3), Err(PreconditionViolation::BlockNotPresent { level: 0, block_address: 3 }));
    drop(level);
    assert!(matches!(
        cache.write_at_level(3, 0),
        Err(CacheError::Precondition(PreconditionViolation::LevelOutOfRange { level: 3, levels: 2 }))
    ));
    // Writing at the memory level only reaches main memory
    cache.write_at_level(2, 0).unwrap();
    assert_eq!(cache.hits().map(|hit| hit.level).collect::<Vec<_>>(), vec![2]);
}

#[test]
fn snapshot_round_trip_does_not_change_outcomes() {
    let first = random_trace(300, 40, 16, 0.4, 1);
    let second = random_trace(300, 40, 16, 0.4, 2);

    let mut plain = small_cache();
    run(&mut plain, &first);
    let expected = run(&mut plain, &second);

    let mut restored = small_cache();
    run(&mut restored, &first);
    let snapshot = restored.state();
    restored.set_state(&snapshot).unwrap();
    assert_eq!(restored.state(), snapshot);
    let actual = run(&mut restored, &second);
    assert_eq!(actual, expected);
}

#[test]
fn snapshot_moves_between_caches() {
    let mut source = small_cache();
    run(&mut source, &random_trace(100, 40, 16, 0.5, 3));
    let json = serde_json::to_string(&source.state()).unwrap();
    let snapshot: Snapshot = serde_json::from_str(&json).unwrap();

    let mut target = small_cache();
    target.set_state(&snapshot).unwrap();
    assert_eq!(target.state(), source.state());
    for level in target.levels() {
        assert_level_consistent(&level.borrow());
    }
}

#[test]
fn snapshot_shape_must_match() {
    let mut cache = small_cache();
    let mut snapshot = cache.state();
    snapshot.levels.pop();
    assert!(matches!(
        cache.set_state(&snapshot),
        Err(CacheError::Precondition(PreconditionViolation::SnapshotLevelCount { snapshot: 1, cache: 2 }))
    ));

    let mut snapshot = cache.state();
    snapshot.levels[1].pop();
    assert!(matches!(
        cache.set_state(&snapshot),
        Err(CacheError::Precondition(PreconditionViolation::SnapshotLevelSize { level: 1, snapshot: 15, cache: 16 }))
    ));
}

#[test]
fn report_describes_last_access() {
    let mut cache = small_cache();
    cache.load(0x40).unwrap();
    let report = cache.to_string();
    assert!(report.contains("2 levels"));
    assert!(report.contains("Read 0x40 went to main memory"));
    assert!(report.contains("0x40 entered L1 cell"));
}
