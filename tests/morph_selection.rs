//! Top-K morph selection and skinned instance bookkeeping on a headless
//! engine.
use glam::Mat4;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use wgpu_model_core::renderer::bar_mesh;
use wgpu_model_core::renderer::skinning::{
    select_top_k, BonePose, MorphTargetData, SkinningError, SkinningState, MAX_ACTIVE_MORPHS,
};
use wgpu_model_core::{Engine, EngineError, EngineSettings};

fn targets(count: usize, vertices: usize) -> Vec<MorphTargetData> {
    (0..count)
        .map(|i| MorphTargetData {
            name: format!("shape{i}"),
            position_deltas: vec![[0.01 * i as f32, 0.0, 0.0]; vertices],
            normal_deltas: vec![[0.0; 3]; vertices],
        })
        .collect()
}

#[test]
fn top_k_picks_the_heaviest_eight() {
    let mut rng = SmallRng::seed_from_u64(5);
    let mut weights: Vec<f32> = (1..=20).map(|i| i as f32 / 20.0).collect();
    weights.shuffle(&mut rng);

    let mut selected = Vec::new();
    select_top_k(&weights, 1e-4, &mut selected);
    assert_eq!(selected.len(), MAX_ACTIVE_MORPHS);

    let mut expected: Vec<f32> = weights.clone();
    expected.sort_by(|a, b| b.total_cmp(a));
    let chosen: Vec<f32> = selected.iter().map(|&(_, w)| w).collect();
    assert_eq!(chosen, expected[..MAX_ACTIVE_MORPHS]);
}

#[test]
fn equal_weights_break_ties_by_index_every_time() {
    let weights = vec![0.5f32; 12];
    let mut first = Vec::new();
    select_top_k(&weights, 1e-4, &mut first);
    let indices: Vec<u32> = first.iter().map(|&(i, _)| i).collect();
    assert_eq!(indices, (0..8).collect::<Vec<u32>>());

    for _ in 0..10 {
        let mut again = Vec::new();
        select_top_k(&weights, 1e-4, &mut again);
        assert_eq!(again, first);
    }
}

#[test]
fn weights_below_epsilon_are_ignored() {
    let mut rng = SmallRng::seed_from_u64(9);
    let weights: Vec<f32> = (0..16)
        .map(|i| if i % 4 == 0 { rng.gen_range(0.2..1.0) } else { 1e-6 })
        .collect();
    let mut selected = Vec::new();
    select_top_k(&weights, 1e-4, &mut selected);
    assert_eq!(selected.len(), 4);
    assert!(selected.iter().all(|&(i, _)| i % 4 == 0));
}

#[test]
fn negative_weights_never_outrank_positive_ones() {
    let mut selected = Vec::new();
    select_top_k(&[0.1, -0.9, -0.5], 1e-4, &mut selected);
    assert_eq!(selected, vec![(0, 0.1)]);

    let weights: Vec<f32> = (0..12)
        .map(|i| if i % 2 == 0 { -(i as f32 + 1.0) } else { i as f32 * 0.01 })
        .collect();
    select_top_k(&weights, 1e-4, &mut selected);
    let indices: Vec<u32> = selected.iter().map(|&(i, _)| i).collect();
    assert_eq!(indices, vec![11, 9, 7, 5, 3, 1]);
}

#[test]
fn instances_refresh_their_active_set_each_update() {
    let mut engine = Engine::headless(EngineSettings::default());
    let (vertices, indices) = bar_mesh(4, 2, 0.2, 1.0);
    let prototype = engine
        .create_skinned_prototype(&vertices, &indices, 2, &targets(10, vertices.len()))
        .unwrap();
    let mut instance = engine.create_skinned_instance(&prototype).unwrap();

    let weights: Vec<f32> = (0..10).map(|i| (i + 1) as f32 * 0.05).collect();
    instance.set_weights(&weights).unwrap();
    engine.update_skinning(&mut instance);
    assert_eq!(instance.state(), SkinningState::Uploading);

    let active: Vec<u32> = instance.morphs().active().iter().map(|m| m.logical_index).collect();
    assert_eq!(active, vec![9, 8, 7, 6, 5, 4, 3, 2]);

    instance.set_weight("shape0", 1.0).unwrap();
    engine.update_skinning(&mut instance);
    assert_eq!(instance.morphs().active()[0].logical_index, 0);
    assert_eq!(instance.morphs().active().len(), MAX_ACTIVE_MORPHS);

    let offsets: Vec<u32> = prototype
        .morph_targets()
        .iter()
        .map(|t| t.atlas_offset_texels)
        .collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn unknown_morph_names_are_rejected() {
    let mut engine = Engine::headless(EngineSettings::default());
    let (vertices, indices) = bar_mesh(2, 1, 0.2, 1.0);
    let prototype = engine
        .create_skinned_prototype(&vertices, &indices, 1, &targets(2, vertices.len()))
        .unwrap();
    let mut instance = engine.create_skinned_instance(&prototype).unwrap();
    assert_eq!(
        instance.set_weight("smile", 1.0),
        Err(SkinningError::UnknownMorphTarget("smile".into()))
    );
}

#[test]
fn bone_capacity_is_a_hard_limit() {
    let mut settings = EngineSettings::default();
    settings.skinning.max_bones = 4;
    let mut engine = Engine::headless(settings);
    let (vertices, indices) = bar_mesh(4, 4, 0.2, 1.0);

    let err = engine
        .create_skinned_prototype(&vertices, &indices, 5, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Skinning(SkinningError::TooManyBones { count: 5, capacity: 4 })
    ));

    let prototype = engine
        .create_skinned_prototype(&vertices, &indices, 4, &[])
        .unwrap();
    let mut instance = engine.create_skinned_instance(&prototype).unwrap();
    let too_many = vec![BonePose::root(Mat4::IDENTITY, Mat4::IDENTITY); 5];
    assert!(matches!(
        instance.set_bone_hierarchy(&too_many),
        Err(SkinningError::TooManyBones { .. })
    ));
    assert_eq!(instance.palette().len(), 4);

    assert!(matches!(
        instance.set_bone_matrices(&[Mat4::IDENTITY; 5]),
        Err(SkinningError::TooManyBones { .. })
    ));
    instance.set_bone_matrices(&[Mat4::IDENTITY; 4]).unwrap();
    assert_eq!(instance.palette().len(), 4);
}

#[test]
fn palettes_must_cover_the_whole_skeleton() {
    let mut engine = Engine::headless(EngineSettings::default());
    let (vertices, indices) = bar_mesh(4, 3, 0.2, 1.0);
    let prototype = engine
        .create_skinned_prototype(&vertices, &indices, 3, &[])
        .unwrap();
    let mut instance = engine.create_skinned_instance(&prototype).unwrap();

    assert_eq!(
        instance.set_bone_matrices(&[Mat4::IDENTITY; 2]),
        Err(SkinningError::BoneCountMismatch { expected: 3, actual: 2 })
    );
    let short = vec![BonePose::root(Mat4::IDENTITY, Mat4::IDENTITY); 1];
    assert_eq!(
        instance.set_bone_hierarchy(&short),
        Err(SkinningError::BoneCountMismatch { expected: 3, actual: 1 })
    );
    assert_eq!(instance.palette().len(), 3);

    instance.set_bone_matrices(&[Mat4::IDENTITY; 3]).unwrap();
}

#[test]
fn instances_share_source_and_release_results() {
    let mut engine = Engine::headless(EngineSettings::default());
    let (vertices, indices) = bar_mesh(3, 2, 0.2, 1.0);
    let prototype = engine
        .create_skinned_prototype(&vertices, &indices, 2, &targets(3, vertices.len()))
        .unwrap();
    let a = engine.create_skinned_instance(&prototype).unwrap();
    let b = a.instantiate(engine.arenas_mut()).unwrap();

    assert_eq!(
        a.prototype().source().allocation(),
        b.prototype().source().allocation()
    );
    assert_ne!(a.result().allocation(), b.result().allocation());
    // source + two results
    assert_eq!(engine.arenas().live_allocations(), 3);

    drop(a);
    drop(b);
    drop(prototype);
    engine.begin_frame();
    assert_eq!(engine.arenas().live_allocations(), 0);
    assert_eq!(engine.skinning().live_morph_allocations(), 0);
    assert_eq!(engine.shutdown(), 0);
}
