// renderer/renderer.rs
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;

use glam::{Mat4, Vec3};

use crate::asset::Handle;
use crate::renderer::arena::ArenaManager;
use crate::renderer::frame::{FrameError, FramePlanner, GeometryRef, InstancedDraw};
use crate::renderer::internal::{
    base_color_layout, CameraBuffer, CameraSlot, DynamicMaterialsBuffer, DynamicObjectsBuffer,
    GpuContext, MaterialTextureBinder, MeshPipelines, PipelineKey, TargetFormats,
};
use crate::renderer::objects::ObjectData;
use crate::renderer::shader_pack::gpu::{ExternalProgramGpu, ExternalResources, NormalMatrixRing};
use crate::renderer::shader_pack::{ProgramId, ShaderPack};
use crate::renderer::texture::{Texture, TextureRegistry};
use crate::renderer::uniforms::{AmbientLight, CameraUniform};
use crate::settings::EngineSettings;

/// GPU-facing frame driver: uploads instance data and encodes the draw plan
/// of a [`FramePlanner`] into host-owned render passes.
pub struct FrameRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    camera: CameraBuffer,
    objects: DynamicObjectsBuffer,
    materials: DynamicMaterialsBuffer,
    normals: NormalMatrixRing,
    builtin: MeshPipelines,
    texture_binder: MaterialTextureBinder,
    textures: TextureRegistry,
    external: HashMap<ProgramId, Option<ExternalProgramGpu>>,
    formats: TargetFormats,
    ambient: AmbientLight,
    buffer_generation: u64,
    opaque_instances: u32,
}

impl FrameRenderer {
    pub fn new(context: &GpuContext, settings: &EngineSettings) -> Self {
        let device = &context.device;
        let capacity = settings.batching.initial_entry_capacity;
        let camera = CameraBuffer::new(device);
        let objects = DynamicObjectsBuffer::new(device, capacity);
        let materials = DynamicMaterialsBuffer::new(device, 64);
        let texture_layout = base_color_layout(device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("MeshShader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("../shader/mesh.wgsl"))),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("MeshPipelineLayout"),
            bind_group_layouts: &[
                &camera.bind_layout,
                &objects.bind_layout,
                &materials.bind_layout,
                &texture_layout,
            ],
            push_constant_ranges: &[],
        });
        let formats = TargetFormats {
            color: settings.targets.color_format.to_wgpu(),
            depth: settings.targets.depth_format.to_wgpu(),
        };

        Self {
            device: device.clone(),
            queue: context.queue.clone(),
            camera,
            objects,
            materials,
            normals: NormalMatrixRing::new(device, capacity),
            builtin: MeshPipelines::new("MeshPipeline", layout, shader, formats),
            texture_binder: MaterialTextureBinder::new(texture_layout),
            textures: TextureRegistry::new(device, &context.queue),
            external: HashMap::new(),
            formats,
            ambient: AmbientLight::default(),
            buffer_generation: 0,
            opaque_instances: 0,
        }
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn register_texture(&mut self, view: wgpu::TextureView) -> Handle<Texture> {
        self.textures.register_view(&self.device, view)
    }

    /// Drops the pipelines and bind groups built for `id`.
    pub fn forget_program(&mut self, id: ProgramId) {
        if self.external.remove(&id).is_some() {
            log::debug!("Released GPU state of {}", id);
        }
    }

    pub fn set_ambient(&mut self, ambient: AmbientLight) {
        self.ambient = ambient;
    }

    /// Encodes the opaque and cutout draws of `planner`. Uploads the material
    /// table and the instance data of the opaque part.
    pub fn flush_opaque(
        &mut self,
        planner: &mut FramePlanner,
        pass: &mut wgpu::RenderPass<'_>,
        arenas: &ArenaManager,
        shader_pack: &ShaderPack,
        view: Mat4,
        proj: Mat4,
    ) -> Result<(), FrameError> {
        let range = planner.plan_opaque()?;

        let camera_pos = view.inverse().transform_point3(Vec3::ZERO);
        let camera = CameraUniform::from_matrices(view, proj, camera_pos, self.ambient.to_uniform());
        self.camera.write(&self.queue, CameraSlot::Opaque, &camera);

        let materials_capacity = self.materials.capacity;
        self.materials
            .update(&self.device, &self.queue, planner.store().materials());
        let objects_capacity = self.objects.capacity;
        let total = planner.store().len() as u32;
        self.objects.reserve(&self.device, total);
        let normals_replaced = self.normals.reserve(&self.device, total);
        if normals_replaced
            || materials_capacity != self.materials.capacity
            || objects_capacity != self.objects.capacity
        {
            self.buffer_generation += 1;
            let generation = self.buffer_generation;
            for program in self.external.values_mut().flatten() {
                program.retain_generation(generation);
            }
        }

        self.upload_instances(planner, range.clone(), 0, shader_pack);
        self.opaque_instances = planner.instances_of(range.clone()).len() as u32;

        let issued = self.encode(planner, pass, arenas, shader_pack, range, CameraSlot::Opaque);
        planner.stats_mut().opaque_draw_calls += issued;
        Ok(())
    }

    /// Encodes translucent entries back to front, one draw each.
    pub fn flush_translucent(
        &mut self,
        planner: &mut FramePlanner,
        pass: &mut wgpu::RenderPass<'_>,
        arenas: &ArenaManager,
        shader_pack: &ShaderPack,
        view: Mat4,
        proj: Mat4,
        camera_pos: Vec3,
    ) -> Result<(), FrameError> {
        let range = planner.plan_translucent(camera_pos)?;

        let camera = CameraUniform::from_matrices(view, proj, camera_pos, self.ambient.to_uniform());
        self.camera.write(&self.queue, CameraSlot::Translucent, &camera);

        self.upload_instances(planner, range.clone(), self.opaque_instances, shader_pack);

        let issued = self.encode(planner, pass, arenas, shader_pack, range, CameraSlot::Translucent);
        planner.stats_mut().translucent_draw_calls += issued;
        Ok(())
    }

    fn upload_instances(
        &mut self,
        planner: &FramePlanner,
        range: Range<usize>,
        first: u32,
        shader_pack: &ShaderPack,
    ) {
        let store = planner.store();
        let rows = planner.instances_of(range);

        self.objects.scratch.clear();
        self.objects.scratch.extend(rows.iter().map(|&row| {
            ObjectData::new(
                store.model(row),
                store.normal(row),
                store.material_index(row),
                store.packed_light(row),
                store.overlay(row),
            )
        }));
        self.objects.flush(&self.device, &self.queue, first);

        let splits = shader_pack
            .active()
            .is_some_and(|program| program.slots().splits_instances());
        if splits {
            self.normals
                .write(&self.queue, first, rows.iter().map(|&row| store.normal(row)));
        }
    }

    fn external_program(&mut self, shader_pack: &ShaderPack) -> Option<ProgramId> {
        let program = shader_pack.active()?;
        let device = &self.device;
        let formats = self.formats;
        self.external
            .entry(program.id())
            .or_insert_with(|| ExternalProgramGpu::new(device, program, formats))
            .as_ref()
            .map(ExternalProgramGpu::id)
    }

    /// Returns the number of draw calls issued.
    fn encode(
        &mut self,
        planner: &mut FramePlanner,
        pass: &mut wgpu::RenderPass<'_>,
        arenas: &ArenaManager,
        shader_pack: &ShaderPack,
        range: Range<usize>,
        slot: CameraSlot,
    ) -> u32 {
        if range.is_empty() {
            return 0;
        }

        let external_id = self.external_program(shader_pack);
        let Self {
            device,
            camera,
            objects,
            materials,
            normals,
            builtin,
            texture_binder,
            textures,
            external,
            buffer_generation,
            ..
        } = self;

        let mut issued = 0;
        let mut skipped = 0;
        let mut current_key: Option<PipelineKey> = None;
        let mut current_texture: Option<Option<Handle<Texture>>> = None;

        let mut external = external_id.and_then(|id| external.get_mut(&id)).and_then(Option::as_mut);
        if external.is_none() {
            pass.set_bind_group(0, &camera.bind_group, &[slot.offset()]);
            pass.set_bind_group(1, &objects.bind_group, &[]);
            pass.set_bind_group(2, &materials.bind_group, &[]);
        }
        let resources = ExternalResources {
            camera: &camera.buffer,
            objects: &objects.buffer,
            materials: &materials.buffer,
            normals: &normals.buffer,
            generation: *buffer_generation,
        };

        let store = planner.store();
        for draw in planner.draws(range) {
            let Some(material) = store.material(draw.material) else {
                skipped += 1;
                continue;
            };
            if !bind_geometry(pass, arenas, &draw.geometry) {
                skipped += 1;
                continue;
            }

            let key = PipelineKey::new(material.render_type, material.is_double_sided());
            match external.as_deref_mut() {
                None => {
                    if current_key != Some(key) {
                        pass.set_pipeline(builtin.get(device, key));
                        current_key = Some(key);
                    }
                    if current_texture != Some(material.base_color_texture) {
                        let group =
                            texture_binder.bind_group(device, textures, material.base_color_texture);
                        pass.set_bind_group(3, group, &[]);
                        current_texture = Some(material.base_color_texture);
                    }
                    issue(pass, draw, draw.instance_range());
                    issued += 1;
                }
                Some(program) => {
                    if current_key != Some(key) {
                        pass.set_pipeline(program.pipeline(device, key));
                        current_key = Some(key);
                    }
                    let per_instance = program.slots().splits_instances();
                    let draws: Vec<Range<u32>> = if per_instance {
                        draw.instance_range().map(|i| i..i + 1).collect()
                    } else {
                        vec![draw.instance_range()]
                    };
                    for instances in draws {
                        for group in 0..program.group_count() {
                            let offsets = program.dynamic_offsets(group, slot.offset(), instances.start);
                            let bind_group =
                                program.bind_group(device, group, &resources, textures, material);
                            pass.set_bind_group(group, bind_group, &offsets);
                        }
                        issue(pass, draw, instances);
                        issued += 1;
                    }
                }
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {} draws with missing geometry buffers", skipped);
            planner.stats_mut().skipped_draws += skipped;
        }
        issued
    }
}

/// Binds the vertex and index slices of `geometry`. Returns false if either
/// arena has no GPU buffer or the range is empty.
fn bind_geometry(pass: &mut wgpu::RenderPass<'_>, arenas: &ArenaManager, geometry: &GeometryRef) -> bool {
    if geometry.count == 0 || geometry.vertices.is_empty() {
        return false;
    }
    let Some(vertex_buffer) = arenas
        .arena(geometry.vertex_arena)
        .and_then(|arena| arena.vertices().gpu_buffer())
    else {
        return false;
    };
    pass.set_vertex_buffer(
        0,
        vertex_buffer.slice(geometry.vertices.offset..geometry.vertices.end()),
    );

    if geometry.is_indexed() {
        let Some(index_buffer) = arenas
            .arena(geometry.index_arena)
            .and_then(|arena| arena.indices())
            .and_then(|indices| indices.gpu_buffer())
        else {
            return false;
        };
        pass.set_index_buffer(
            index_buffer.slice(geometry.indices.offset..geometry.indices.end()),
            wgpu::IndexFormat::Uint32,
        );
    }
    true
}

fn issue(pass: &mut wgpu::RenderPass<'_>, draw: &InstancedDraw, instances: Range<u32>) {
    let elements = draw.geometry.first..draw.geometry.first + draw.geometry.count;
    if draw.geometry.is_indexed() {
        pass.draw_indexed(elements, 0, instances);
    } else {
        pass.draw(elements, instances);
    }
}
