//! Randomised allocate/free sequences against the range allocator and the
//! host-backed arena manager.
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wgpu_model_core::renderer::arena::{
    align_up, ArenaError, ArenaManager, RangeAllocator, Segment, VertexLayoutId,
};
use wgpu_model_core::settings::ArenaSettings;

fn assert_disjoint(live: &[Segment]) {
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
        }
    }
}

#[test]
fn live_segments_never_overlap() {
    for seed in 0..8u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut allocator = RangeAllocator::new(256, 1 << 24);
        let mut live: Vec<Segment> = Vec::new();

        for _ in 0..500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let size = rng.gen_range(1..2048);
                let placement = allocator.allocate(size).unwrap();
                assert!(placement.segment.size >= size);
                assert!(placement.segment.end() <= allocator.capacity());
                live.push(placement.segment);
            } else {
                let index = rng.gen_range(0..live.len());
                allocator.free(live.swap_remove(index)).unwrap();
            }
            assert_disjoint(&live);
            assert_eq!(allocator.live_count(), live.len());
        }
    }
}

#[test]
fn equal_sized_round_trip_restores_free_space() {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut allocator = RangeAllocator::new(1 << 20, 1 << 24);
    allocator.allocate(100).unwrap();
    let before = allocator.free_bytes();

    let size = 96;
    let mut segments: Vec<Segment> = (0..64).map(|_| allocator.allocate(size).unwrap().segment).collect();
    assert_eq!(allocator.free_bytes(), before - 64 * align_up(size));

    while !segments.is_empty() {
        let index = rng.gen_range(0..segments.len());
        allocator.free(segments.swap_remove(index)).unwrap();
    }
    assert_eq!(allocator.free_bytes(), before);
}

#[test]
fn freed_middle_segment_is_reused_in_place() {
    let mut allocator = RangeAllocator::new(452, 1 << 20);
    let _a = allocator.allocate(100).unwrap().segment;
    let b = allocator.allocate(200).unwrap().segment;
    let _c = allocator.allocate(150).unwrap().segment;
    let capacity = allocator.capacity();

    allocator.free(b).unwrap();
    let reused = allocator.allocate(200).unwrap();

    assert_eq!(reused.segment.offset, b.offset);
    assert!(reused.growth.is_none());
    assert_eq!(allocator.capacity(), capacity);
}

#[test]
fn manager_reuse_scenario_does_not_grow_the_arena() {
    let settings = ArenaSettings {
        initial_vertex_bytes: 452,
        initial_index_bytes: 64,
        max_bytes: 1 << 20,
    };
    let mut arenas = ArenaManager::headless(settings);
    let _a = arenas.allocate(VertexLayoutId::Static, 100, 0).unwrap();
    let b = arenas.allocate(VertexLayoutId::Static, 200, 0).unwrap();
    let _c = arenas.allocate(VertexLayoutId::Static, 150, 0).unwrap();
    let epoch = arenas.arena(VertexLayoutId::Static).unwrap().epoch();

    arenas.free(b).unwrap();
    let again = arenas.allocate(VertexLayoutId::Static, 200, 0).unwrap();

    assert_eq!(again.vertices.offset, b.vertices.offset);
    assert_eq!(arenas.arena(VertexLayoutId::Static).unwrap().epoch(), epoch);
}

#[test]
fn ceiling_violation_is_reported_not_fatal() {
    let settings = ArenaSettings {
        initial_vertex_bytes: 64,
        initial_index_bytes: 64,
        max_bytes: 1024,
    };
    let mut arenas = ArenaManager::headless(settings);
    let kept = arenas.allocate(VertexLayoutId::Static, 512, 0).unwrap();

    let err = arenas.allocate(VertexLayoutId::Static, 1024, 0).unwrap_err();
    assert!(matches!(err, ArenaError::CapacityExceeded { .. }));
    assert_eq!(arenas.live_allocations(), 1);
    arenas.free(kept).unwrap();
    assert_eq!(arenas.shutdown(), 0);
}

#[test]
fn dropped_guards_release_exactly_once() {
    let mut arenas = ArenaManager::headless(ArenaSettings::default());
    let guards: Vec<_> = (0..10)
        .map(|_| arenas.allocate_owned(VertexLayoutId::Static, 320, 120).unwrap())
        .collect();
    assert_eq!(arenas.live_allocations(), 10);

    drop(guards);
    assert_eq!(arenas.collect_released(), 10);
    assert_eq!(arenas.collect_released(), 0);
    assert_eq!(arenas.live_allocations(), 0);
}

#[test]
fn half_empty_allocations_are_each_counted_as_leaks() {
    let mut arenas = ArenaManager::headless(ArenaSettings::default());
    let vertex_only = arenas.allocate(VertexLayoutId::Static, 64, 0).unwrap();
    let index_only = arenas.allocate(VertexLayoutId::Static, 0, 12).unwrap();
    assert_eq!(arenas.live_allocations(), 2);
    assert_eq!(arenas.shutdown(), 2);

    arenas.free(vertex_only).unwrap();
    assert_eq!(arenas.shutdown(), 1);
    arenas.free(index_only).unwrap();
    assert_eq!(arenas.shutdown(), 0);
}
