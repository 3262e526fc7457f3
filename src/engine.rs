use std::rc::Rc;

use glam::{Mat3, Mat4, Vec3};
use thiserror::Error;

use crate::asset::Handle;
use crate::renderer::arena::{
    ArenaError, ArenaManager, GeometryAllocation, GpuBackingFactory, SegmentGuard, VertexLayoutId,
};
use crate::renderer::frame::{FrameError, FramePlanner, FrameStats, GeometryRef};
use crate::renderer::internal::{ContextError, GpuContext};
use crate::renderer::shader_pack::{ProgramId, ShaderPack, ShaderPackError, SlotTable};
use crate::renderer::skinning::{
    ComputeSkinner, MorphTargetData, SkinnedInstance, SkinnedPrototype, SkinningError,
    SkinningSystem,
};
use crate::renderer::texture::Texture;
use crate::renderer::uniforms::AmbientLight;
use crate::renderer::{FrameRenderer, Material, SkinnedVertex, Vertex};
use crate::settings::EngineSettings;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Skinning(#[from] SkinningError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    ShaderPack(#[from] ShaderPackError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("{0} needs a GPU device but the engine is headless")]
    Headless(&'static str),
}

/// Process-scoped owner of the arenas, frame state, skinning and shader pack.
///
/// Built once at startup and handed to whatever records or renders. A
/// headless engine (no device) allocates from host memory and plans frames
/// but cannot encode passes or dispatch skinning.
pub struct Engine {
    settings: EngineSettings,
    arenas: ArenaManager,
    planner: FramePlanner,
    skinning: SkinningSystem,
    shader_pack: ShaderPack,
    renderer: Option<FrameRenderer>,
}

impl Engine {
    pub fn new(context: &GpuContext, settings: EngineSettings) -> Self {
        let settings = settings.validate();
        let factory = GpuBackingFactory::new(&context.device, &context.queue);
        let skinner = ComputeSkinner::new(
            &context.device,
            &context.queue,
            settings.skinning.initial_palette_capacity,
            settings.skinning.max_bones,
        );
        let skinning = SkinningSystem::new(
            settings.skinning.clone(),
            &factory,
            settings.arena.initial_vertex_bytes,
            settings.arena.max_bytes,
            Some(skinner),
        );
        let renderer = FrameRenderer::new(context, &settings);
        log::info!("Engine started with GPU backing");

        Self {
            arenas: ArenaManager::new(settings.arena.clone(), Box::new(factory)),
            planner: FramePlanner::new(&settings.batching),
            skinning,
            shader_pack: ShaderPack::new(),
            renderer: Some(renderer),
            settings,
        }
    }

    pub fn headless(settings: EngineSettings) -> Self {
        let settings = settings.validate();
        let arenas = ArenaManager::headless(settings.arena.clone());
        let skinning = SkinningSystem::new(
            settings.skinning.clone(),
            arenas.factory(),
            settings.arena.initial_vertex_bytes,
            settings.arena.max_bytes,
            None,
        );
        log::info!("Engine started headless");

        Self {
            arenas,
            planner: FramePlanner::new(&settings.batching),
            skinning,
            shader_pack: ShaderPack::new(),
            renderer: None,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn arenas(&self) -> &ArenaManager {
        &self.arenas
    }

    pub fn arenas_mut(&mut self) -> &mut ArenaManager {
        &mut self.arenas
    }

    pub fn planner(&self) -> &FramePlanner {
        &self.planner
    }

    pub fn skinning(&self) -> &SkinningSystem {
        &self.skinning
    }

    pub fn shader_pack(&self) -> &ShaderPack {
        &self.shader_pack
    }

    pub fn renderer(&self) -> Option<&FrameRenderer> {
        self.renderer.as_ref()
    }

    pub fn is_headless(&self) -> bool {
        self.renderer.is_none()
    }

    pub fn stats(&self) -> FrameStats {
        self.planner.stats()
    }

    // Geometry

    /// Uploads a static mesh into the shared static arena.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<SegmentGuard, EngineError> {
        Ok(self.arenas.upload(
            VertexLayoutId::Static,
            bytemuck::cast_slice(vertices),
            bytemuck::cast_slice(indices),
        )?)
    }

    pub fn allocate(
        &mut self,
        layout: VertexLayoutId,
        vertex_bytes: u64,
        index_bytes: u64,
    ) -> Result<GeometryAllocation, EngineError> {
        Ok(self.arenas.allocate(layout, vertex_bytes, index_bytes)?)
    }

    pub fn free(&mut self, allocation: GeometryAllocation) -> Result<(), EngineError> {
        Ok(self.arenas.free(allocation)?)
    }

    // Skinning

    pub fn create_skinned_prototype(
        &mut self,
        vertices: &[SkinnedVertex],
        indices: &[u32],
        bone_count: u32,
        morph_targets: &[MorphTargetData],
    ) -> Result<Rc<SkinnedPrototype>, EngineError> {
        Ok(self.skinning.create_prototype(
            &mut self.arenas,
            vertices,
            indices,
            bone_count,
            morph_targets,
        )?)
    }

    pub fn create_skinned_instance(
        &mut self,
        prototype: &Rc<SkinnedPrototype>,
    ) -> Result<SkinnedInstance, EngineError> {
        Ok(self.skinning.create_instance(&mut self.arenas, prototype)?)
    }

    /// Starts the instance's tick after the host has set bones and weights.
    pub fn update_skinning(&self, instance: &mut SkinnedInstance) {
        self.skinning.update(instance);
    }

    /// Encodes the compute pass for every updated instance. Call after
    /// `begin_frame` and record on `encoder` before the render passes that
    /// draw those instances.
    pub fn dispatch_skinning<'a>(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        instances: impl IntoIterator<Item = &'a mut SkinnedInstance>,
    ) -> u32 {
        let dispatched = self.skinning.dispatch(encoder, &self.arenas, instances);
        self.planner.stats_mut().skinning_dispatches += dispatched;
        dispatched
    }

    // Shader pack

    pub fn register_program(&mut self, id: ProgramId, source: &str) -> Result<&SlotTable, EngineError> {
        Ok(self.shader_pack.register(id, source)?)
    }

    pub fn activate_program(&mut self, id: Option<ProgramId>) -> Result<(), EngineError> {
        Ok(self.shader_pack.activate(id)?)
    }

    pub fn unregister_program(&mut self, id: ProgramId) -> bool {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.forget_program(id);
        }
        self.shader_pack.unregister(id)
    }

    // Textures and lighting

    pub fn register_texture(&mut self, view: wgpu::TextureView) -> Result<Handle<Texture>, EngineError> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or(EngineError::Headless("register_texture"))?;
        Ok(renderer.register_texture(view))
    }

    pub fn set_ambient(&mut self, ambient: AmbientLight) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_ambient(ambient);
        }
    }

    // Frame lifecycle

    /// Frees geometry whose owners were dropped and rewinds the frame.
    pub fn begin_frame(&mut self) {
        let released = self.arenas.collect_released();
        let morphs = self.skinning.collect_released();
        if released + morphs > 0 {
            log::debug!(
                "Released {} geometry and {} morph allocations",
                released,
                morphs
            );
        }
        self.planner.begin_frame();
    }

    pub fn record(
        &mut self,
        geometry: GeometryRef,
        material: &Material,
        model: Mat4,
        normal: Mat3,
        packed_light: u32,
        overlay: u32,
    ) {
        self.planner
            .record(geometry, material, model, normal, packed_light, overlay);
    }

    /// Records the deformed vertices of `instance`. An instance that was not
    /// dispatched this tick is skipped with a warning.
    pub fn record_skinned(
        &mut self,
        instance: &SkinnedInstance,
        material: &Material,
        model: Mat4,
        normal: Mat3,
        packed_light: u32,
        overlay: u32,
    ) {
        match instance.geometry() {
            Ok(geometry) => self.record(geometry, material, model, normal, packed_light, overlay),
            Err(err) => {
                log::warn!("Skipping skinned draw: {}", err);
                self.planner.skip();
            }
        }
    }

    pub fn sort(&mut self) -> Result<(), EngineError> {
        Ok(self.planner.sort()?)
    }

    pub fn flush_opaque(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        view: Mat4,
        proj: Mat4,
    ) -> Result<(), EngineError> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or(EngineError::Headless("flush_opaque"))?;
        renderer.flush_opaque(
            &mut self.planner,
            pass,
            &self.arenas,
            &self.shader_pack,
            view,
            proj,
        )?;
        Ok(())
    }

    pub fn flush_translucent(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        view: Mat4,
        proj: Mat4,
        camera_pos: Vec3,
    ) -> Result<(), EngineError> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or(EngineError::Headless("flush_translucent"))?;
        renderer.flush_translucent(
            &mut self.planner,
            pass,
            &self.arenas,
            &self.shader_pack,
            view,
            proj,
            camera_pos,
        )?;
        Ok(())
    }

    pub fn end_frame(&mut self) -> FrameStats {
        let stats = self.planner.stats();
        log::debug!(
            "Frame: {} entries, {} draw calls ({} instanced), {} skinned, {} skipped",
            stats.entries,
            stats.total_draw_calls(),
            stats.instanced_draws,
            stats.skinning_dispatches,
            stats.skipped_draws
        );
        stats
    }

    /// Drains pending releases and reports leaked segments. Returns the leak
    /// count.
    pub fn shutdown(&mut self) -> usize {
        self.skinning.collect_released();
        let morphs = self.skinning.live_morph_allocations();
        if morphs > 0 {
            log::error!("Morph atlas still holds {} live ranges at shutdown", morphs);
        }
        let leaked = self.arenas.shutdown() + morphs;
        if leaked == 0 {
            log::info!("Engine shut down cleanly");
        }
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{bar_mesh, cube_mesh};
    use crate::renderer::skinning::SkinningState;

    #[test]
    fn headless_engine_plans_a_frame() {
        let mut engine = Engine::headless(EngineSettings::default());
        let (vertices, indices) = cube_mesh();
        let cube = engine.upload_mesh(&vertices, &indices).unwrap();
        let geometry = GeometryRef::whole(cube.allocation());

        engine.begin_frame();
        let material = Material::opaque([200, 80, 40, 255]);
        for x in 0..10 {
            let model = Mat4::from_translation(Vec3::new(x as f32, 0.0, 0.0));
            engine.record(geometry, &material, model, Mat3::IDENTITY, 0, 0);
        }
        engine.sort().unwrap();

        assert_eq!(engine.stats().entries, 10);
        assert_eq!(engine.stats().instanced_draws, 1);
        assert!(engine.is_headless());
    }

    #[test]
    fn external_programs_register_without_a_device() {
        let mut engine = Engine::headless(EngineSettings::default());
        let source = r#"
@group(0) @binding(0) var<uniform> camera: mat4x4<f32>;
@vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera * vec4<f32>(p, 1.0);
}
@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
"#;
        let slots = engine.register_program(ProgramId(5), source).unwrap();
        assert!(slots.is_complete());
        engine.activate_program(Some(ProgramId(5))).unwrap();
        assert!(engine.unregister_program(ProgramId(5)));
        assert!(engine.shader_pack().active().is_none());
        assert!(matches!(
            engine.register_program(ProgramId(6), "fn ("),
            Err(EngineError::ShaderPack(ShaderPackError::Parse { .. }))
        ));
    }

    #[test]
    fn undispatched_skinned_instances_are_skipped() {
        let mut engine = Engine::headless(EngineSettings::default());
        let (vertices, indices) = crate::renderer::bar_mesh(4, 2, 0.2, 1.0);
        let prototype = engine
            .create_skinned_prototype(&vertices, &indices, 2, &[])
            .unwrap();
        let mut instance = engine.create_skinned_instance(&prototype).unwrap();
        engine.update_skinning(&mut instance);
        assert_eq!(instance.state(), SkinningState::Uploading);

        engine.begin_frame();
        engine.record_skinned(&instance, &Material::white(), Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
        engine.sort().unwrap();

        assert_eq!(engine.stats().entries, 0);
        assert_eq!(engine.stats().skipped_draws, 1);
    }

    #[test]
    fn dropped_geometry_is_collected_at_frame_start() {
        let mut engine = Engine::headless(EngineSettings::default());
        let (vertices, indices) = cube_mesh();
        let cube = engine.upload_mesh(&vertices, &indices).unwrap();
        assert_eq!(engine.arenas().live_allocations(), 1);

        drop(cube);
        engine.begin_frame();
        assert_eq!(engine.arenas().live_allocations(), 0);
        assert_eq!(engine.shutdown(), 0);
    }

    #[test]
    fn shutdown_counts_leaked_morph_ranges() {
        let mut engine = Engine::headless(EngineSettings::default());
        let (vertices, indices) = bar_mesh(2, 2, 0.2, 1.0);
        let targets = [MorphTargetData {
            name: "bulge".into(),
            position_deltas: vec![[0.1, 0.0, 0.0]; vertices.len()],
            normal_deltas: vec![[0.0; 3]; vertices.len()],
        }];
        let prototype = engine
            .create_skinned_prototype(&vertices, &indices, 2, &targets)
            .unwrap();
        assert_eq!(engine.skinning().live_morph_allocations(), 1);
        // source geometry plus its morph range
        assert_eq!(engine.shutdown(), 2);

        drop(prototype);
        assert_eq!(engine.shutdown(), 0);
    }
}
