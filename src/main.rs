use glam::{Mat3, Mat4, Quat, Vec3};
use wgpu_model_core::renderer::frame::GeometryRef;
use wgpu_model_core::renderer::skinning::{BonePose, MorphTargetData, SkinnedInstance};
use wgpu_model_core::renderer::{bar_mesh, cube_mesh, AmbientLight, Material};
use wgpu_model_core::{Engine, EngineError, EngineSettings, GpuContext, OffscreenTarget};

const FRAMES: u32 = 3;
const GRID: i32 = 8;
const BAR_SEGMENTS: u32 = 12;
const BAR_BONES: u32 = 3;
const BAR_HEIGHT: f32 = 3.0;

fn bar_bones(bend: f32) -> Vec<BonePose> {
    let step = BAR_HEIGHT / BAR_BONES as f32;
    let mut bones = vec![BonePose::root(Mat4::IDENTITY, Mat4::IDENTITY)];
    for bone in 1..BAR_BONES {
        let local = Mat4::from_rotation_translation(Quat::from_rotation_z(bend), Vec3::Y * step);
        let inverse_bind = Mat4::from_translation(-Vec3::Y * step * bone as f32);
        bones.push(BonePose::child(bone - 1, local, inverse_bind));
    }
    bones
}

fn bulge_target(vertices: &[wgpu_model_core::renderer::SkinnedVertex]) -> MorphTargetData {
    MorphTargetData {
        name: "bulge".to_string(),
        position_deltas: vertices
            .iter()
            .map(|v| (Vec3::from(v.normal) * 0.15).to_array())
            .collect(),
        normal_deltas: vec![[0.0; 3]; vertices.len()],
    }
}

fn record_scene(engine: &mut Engine, cube: GeometryRef, bars: &[SkinnedInstance]) {
    let red = Material::opaque([200, 60, 50, 255]);
    let grey = Material::opaque([150, 150, 160, 255]);
    let leaves = Material::cutout([60, 180, 70, 255], 0.5).with_double_sided(true);
    let glass = Material::translucent([120, 180, 255, 110]);

    for x in -GRID / 2..GRID / 2 {
        for z in -GRID / 2..GRID / 2 {
            let material = if (x + z) % 2 == 0 { &red } else { &grey };
            let model = Mat4::from_translation(Vec3::new(x as f32 * 1.5, 0.0, z as f32 * 1.5));
            engine.record(cube, material, model, Mat3::IDENTITY, 0x00f0_00f0, 0);
        }
    }

    for x in 0..4 {
        let model = Mat4::from_translation(Vec3::new(x as f32 * 2.0 - 3.0, 1.5, -6.0));
        engine.record(cube, &leaves, model, Mat3::IDENTITY, 0x00f0_00f0, 0);
    }

    for x in 0..5 {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::splat(1.2),
            Quat::IDENTITY,
            Vec3::new(x as f32 * 2.0 - 4.0, 1.5, 2.0 + x as f32),
        );
        engine.record(cube, &glass, model, Mat3::IDENTITY, 0x00f0_00f0, 0);
    }

    let bar_material = Material::opaque([230, 200, 90, 255]);
    for (i, bar) in bars.iter().enumerate() {
        let model = Mat4::from_translation(Vec3::new(i as f32 * 3.0 - 1.5, 0.5, -2.0));
        engine.record_skinned(bar, &bar_material, model, Mat3::IDENTITY, 0x00f0_00f0, 0);
    }
}

async fn run() -> Result<(), EngineError> {
    let settings = EngineSettings::load();
    let context = GpuContext::request_headless().await?;
    let target = OffscreenTarget::new(&context.device, 640, 480, &settings.targets);
    let mut engine = Engine::new(&context, settings);
    engine.set_ambient(AmbientLight {
        color: [1.0, 0.95, 0.9],
        intensity: 0.8,
    });

    let (vertices, indices) = cube_mesh();
    let cube_guard = engine.upload_mesh(&vertices, &indices)?;
    let cube = GeometryRef::whole(cube_guard.allocation());

    let (bar_vertices, bar_indices) = bar_mesh(BAR_SEGMENTS, BAR_BONES, 0.4, BAR_HEIGHT);
    let prototype = engine.create_skinned_prototype(
        &bar_vertices,
        &bar_indices,
        BAR_BONES,
        &[bulge_target(&bar_vertices)],
    )?;
    let first = engine.create_skinned_instance(&prototype)?;
    let second = first.instantiate(engine.arenas_mut())?;
    let mut bars = vec![first, second];

    let camera_pos = Vec3::new(0.0, 8.0, 14.0);
    let view = Mat4::look_at_rh(camera_pos, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(45f32.to_radians(), target.aspect(), 0.1, 100.0);

    for frame in 0..FRAMES {
        engine.begin_frame();
        let t = frame as f32 / FRAMES as f32;
        for (i, bar) in bars.iter_mut().enumerate() {
            let phase = t + i as f32 * 0.5;
            bar.set_bone_hierarchy(&bar_bones((phase * std::f32::consts::TAU).sin() * 0.4))?;
            bar.set_weight("bulge", phase.fract())?;
            engine.update_skinning(bar);
        }

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        engine.dispatch_skinning(&mut encoder, bars.iter_mut());

        record_scene(&mut engine, cube, &bars);
        engine.sort()?;

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("MainPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.06,
                            b: 0.08,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(target.depth.attachment()),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            engine.flush_opaque(&mut pass, view, proj)?;
            engine.flush_translucent(&mut pass, view, proj, camera_pos)?;
        }
        context.queue.submit(Some(encoder.finish()));

        let stats = engine.end_frame();
        log::info!(
            "Frame {}: {} entries -> {} opaque + {} translucent draw calls, {} skinned",
            frame,
            stats.entries,
            stats.opaque_draw_calls,
            stats.translucent_draw_calls,
            stats.skinning_dispatches
        );
    }

    drop(bars);
    drop(prototype);
    drop(cube_guard);
    let leaked = engine.shutdown();
    if leaked > 0 {
        log::error!("{} segments leaked", leaked);
    }
    Ok(())
}

fn main() {
    wgpu_model_core::init_logging();
    log::info!("Starting headless model renderer demo");

    if let Err(err) = pollster::block_on(run()) {
        log::error!("Demo failed: {err}");
        std::process::exit(1);
    }
}
