//! Frame phase ordering as seen by a host driving the engine.
use glam::{Mat3, Mat4, Vec3};
use rstest::rstest;
use wgpu_model_core::renderer::cube_mesh;
use wgpu_model_core::renderer::frame::{FrameError, FramePhase, FramePlanner, GeometryRef};
use wgpu_model_core::renderer::Material;
use wgpu_model_core::settings::BatchingSettings;
use wgpu_model_core::{Engine, EngineSettings};

#[derive(Debug, Clone, Copy)]
enum Step {
    Begin,
    Sort,
    Opaque,
    Translucent,
}

fn apply(planner: &mut FramePlanner, step: Step) -> Result<(), FrameError> {
    match step {
        Step::Begin => {
            planner.begin_frame();
            Ok(())
        }
        Step::Sort => planner.sort(),
        Step::Opaque => planner.plan_opaque().map(|_| ()),
        Step::Translucent => planner.plan_translucent(Vec3::ZERO).map(|_| ()),
    }
}

#[rstest]
#[case(&[Step::Begin, Step::Sort, Step::Opaque, Step::Translucent], true)]
#[case(&[Step::Begin, Step::Sort, Step::Sort, Step::Opaque], true)]
#[case(&[Step::Sort], false)]
#[case(&[Step::Begin, Step::Opaque], false)]
#[case(&[Step::Begin, Step::Sort, Step::Translucent], false)]
#[case(&[Step::Begin, Step::Sort, Step::Opaque, Step::Opaque], false)]
#[case(&[Step::Begin, Step::Sort, Step::Opaque, Step::Begin, Step::Sort], true)]
fn phase_order_is_enforced(#[case] steps: &[Step], #[case] accepted: bool) {
    let mut planner = FramePlanner::new(&BatchingSettings::default());
    let result: Result<(), FrameError> = steps.iter().try_for_each(|&step| apply(&mut planner, step));
    assert_eq!(result.is_ok(), accepted, "{:?}", steps);
}

#[test]
fn phases_advance_through_a_full_frame() {
    let mut planner = FramePlanner::new(&BatchingSettings::default());
    assert_eq!(planner.phase(), FramePhase::Idle);
    planner.begin_frame();
    assert_eq!(planner.phase(), FramePhase::Recording);
    planner.sort().unwrap();
    assert_eq!(planner.phase(), FramePhase::Sorted);
    planner.plan_opaque().unwrap();
    assert_eq!(planner.phase(), FramePhase::OpaqueFlushed);
    planner.plan_translucent(Vec3::ZERO).unwrap();
    assert_eq!(planner.phase(), FramePhase::TranslucentFlushed);
}

#[test]
fn engine_frames_do_not_leak_state() {
    let mut engine = Engine::headless(EngineSettings::default());
    let (vertices, indices) = cube_mesh();
    let cube = engine.upload_mesh(&vertices, &indices).unwrap();
    let geometry = GeometryRef::whole(cube.allocation());
    let opaque = Material::opaque([40, 40, 40, 255]);
    let glass = Material::translucent([40, 40, 200, 120]);

    for frame in 0..3u32 {
        engine.begin_frame();
        for i in 0..(frame + 1) * 10 {
            let model = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
            let material = if i % 5 == 0 { &glass } else { &opaque };
            engine.record(geometry, material, model, Mat3::IDENTITY, 0, 0);
        }
        engine.sort().unwrap();

        let stats = engine.end_frame();
        let total = (frame + 1) * 10;
        assert_eq!(stats.entries, total);
        assert_eq!(stats.translucent_entries, total / 5);
        assert_eq!(stats.opaque_entries, total - total / 5);
        assert_eq!(stats.materials, 2);
        assert_eq!(stats.skipped_draws, 0);
    }

    // Recording after sort is dropped, not appended
    engine.record(geometry, &opaque, Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
    assert_eq!(engine.planner().store().len(), 30);

    drop(cube);
    engine.begin_frame();
    assert_eq!(engine.shutdown(), 0);
}
