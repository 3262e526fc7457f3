//! Sorting and instancing of recorded frames, checked without a device.
use std::collections::BTreeMap;

use glam::{Mat3, Mat4, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;
use wgpu_model_core::renderer::arena::{GeometryAllocation, Segment, VertexLayoutId};
use wgpu_model_core::renderer::frame::{FramePlanner, GeometryRef};
use wgpu_model_core::renderer::{Material, RenderType};
use wgpu_model_core::settings::BatchingSettings;

fn geometry(slot: u64) -> GeometryRef {
    GeometryRef::whole(GeometryAllocation {
        layout: VertexLayoutId::Static,
        vertices: Segment {
            offset: slot * 768,
            size: 768,
            generation: slot as u32 + 1,
        },
        indices: Segment {
            offset: slot * 144,
            size: 144,
            generation: slot as u32 + 1,
        },
    })
}

fn planner(max_instances: u32) -> FramePlanner {
    let mut planner = FramePlanner::new(&BatchingSettings {
        initial_entry_capacity: 4,
        max_instances_per_draw: max_instances,
    });
    planner.begin_frame();
    planner
}

fn at(pos: Vec3) -> Mat4 {
    Mat4::from_translation(pos)
}

#[test]
fn fifty_identical_entries_become_one_draw() {
    let mut planner = planner(1024);
    let material = Material::opaque([90, 90, 90, 255]);
    for i in 0..50 {
        planner.record(geometry(3), &material, at(Vec3::X * i as f32), Mat3::IDENTITY, 0, 0);
    }
    planner.sort().unwrap();

    let range = planner.plan_opaque().unwrap();
    let draws = planner.draws(range);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].instance_count, 50);
    assert_eq!(planner.stats().instanced_draws, 1);
}

#[rstest]
#[case(50, 16, vec![16, 16, 16, 2])]
#[case(8, 8, vec![8])]
#[case(9, 8, vec![8, 1])]
#[case(3, 1, vec![1, 1, 1])]
fn runs_split_at_the_instance_cap(#[case] entries: u32, #[case] cap: u32, #[case] expected: Vec<u32>) {
    let mut planner = planner(cap);
    let material = Material::white();
    for _ in 0..entries {
        planner.record(geometry(0), &material, Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
    }
    planner.sort().unwrap();
    let range = planner.plan_opaque().unwrap();
    let counts: Vec<u32> = planner.draws(range).iter().map(|d| d.instance_count).collect();
    assert_eq!(counts, expected);
}

#[test]
fn batching_draws_the_same_geometry_transform_pairs() {
    let mut rng = SmallRng::seed_from_u64(7);
    let materials = [
        Material::opaque([255, 0, 0, 255]),
        Material::opaque([0, 255, 0, 255]),
        Material::cutout([0, 0, 255, 255], 0.3),
    ];
    let mut planner = planner(5);
    let mut expected: BTreeMap<(GeometryRef, [u32; 3]), usize> = BTreeMap::new();

    for i in 0..300 {
        let geo = geometry(rng.gen_range(0..4));
        let material = &materials[rng.gen_range(0..materials.len())];
        let pos = Vec3::new(i as f32, rng.gen_range(-5.0..5.0), 0.0);
        planner.record(geo, material, at(pos), Mat3::IDENTITY, 0, 0);
        *expected.entry((geo, pos.to_array().map(f32::to_bits))).or_default() += 1;
    }
    planner.sort().unwrap();
    let range = planner.plan_opaque().unwrap();

    let mut drawn: BTreeMap<(GeometryRef, [u32; 3]), usize> = BTreeMap::new();
    for draw in planner.draws(range.clone()) {
        for instance in draw.instance_range() {
            let row = planner.batcher().instances()[instance as usize];
            let store = planner.store();
            assert_eq!(store.geometry(row), draw.geometry);
            assert_eq!(store.material_index(row), draw.material);
            let pos = store.translation(row);
            *drawn.entry((draw.geometry, pos.to_array().map(f32::to_bits))).or_default() += 1;
        }
    }
    assert_eq!(drawn, expected);
    assert!(planner.draws(range).len() < 300);
}

#[test]
fn every_entry_lands_in_exactly_one_bucket() {
    let mut rng = SmallRng::seed_from_u64(11);
    let mut planner = planner(64);
    let mut per_type = [0usize; 3];

    for _ in 0..200 {
        let material = match rng.gen_range(0..3) {
            0 => Material::opaque([10, 10, 10, 255]),
            1 => Material::cutout([10, 10, 10, 255], 0.5),
            _ => Material::translucent([10, 10, 10, 100]),
        };
        per_type[material.render_type.bucket_index()] += 1;
        planner.record(geometry(1), &material, Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
    }

    let store = planner.store();
    let mut seen = vec![0u8; store.len()];
    for ty in RenderType::ALL {
        assert_eq!(store.bucket(ty).len(), per_type[ty.bucket_index()]);
        for &row in store.bucket(ty) {
            seen[row as usize] += 1;
            let material = store.material(store.material_index(row)).unwrap();
            assert_eq!(material.render_type, ty);
        }
    }
    assert!(seen.iter().all(|&count| count == 1));
}

#[test]
fn reset_is_idempotent_and_forgets_history() {
    let material = Material::opaque([1, 2, 3, 255]);

    let mut fresh = planner(64);
    fresh.record(geometry(2), &material, Mat4::IDENTITY, Mat3::IDENTITY, 5, 0);
    fresh.sort().unwrap();
    let range = fresh.plan_opaque().unwrap();
    let fresh_draws = fresh.draws(range).to_vec();

    let mut reused = planner(64);
    for i in 0..40 {
        reused.record(geometry(i % 3), &Material::translucent([9; 4]), Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
    }
    reused.begin_frame();
    reused.begin_frame();
    assert!(reused.store().is_empty());
    assert!(RenderType::ALL.iter().all(|&ty| reused.store().bucket(ty).is_empty()));

    reused.record(geometry(2), &material, Mat4::IDENTITY, Mat3::IDENTITY, 5, 0);
    reused.sort().unwrap();
    let range = reused.plan_opaque().unwrap();
    let reused_draws = reused.draws(range).to_vec();
    assert_eq!(fresh_draws, reused_draws);
    assert_eq!(reused.store().entry(0), fresh.store().entry(0));
}

#[test]
fn translucent_entries_draw_far_to_near() {
    let mut rng = SmallRng::seed_from_u64(3);
    let mut planner = planner(64);
    let glass = Material::translucent([200, 200, 255, 90]);
    for _ in 0..64 {
        let pos = Vec3::new(
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
        );
        planner.record(geometry(0), &glass, at(pos), Mat3::IDENTITY, 0, 0);
    }
    planner.sort().unwrap();
    planner.plan_opaque().unwrap();

    let camera = Vec3::new(1.0, 2.0, 30.0);
    let range = planner.plan_translucent(camera).unwrap();
    let rows = planner.instances_of(range.clone());
    assert_eq!(rows.len(), 64);
    assert!(planner.draws(range).iter().all(|d| d.instance_count == 1));

    let distances: Vec<f32> = rows
        .iter()
        .map(|&row| (planner.store().translation(row) - camera).length_squared())
        .collect();
    assert!(distances.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn translucent_flush_requires_the_opaque_pass() {
    let mut planner = planner(64);
    planner.sort().unwrap();
    assert!(planner.plan_translucent(Vec3::ZERO).is_err());
    planner.plan_opaque().unwrap();
    assert!(planner.plan_translucent(Vec3::ZERO).is_ok());
}
