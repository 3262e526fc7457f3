use std::borrow::Cow;
use std::mem;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::instance::{SkinnedInstance, SkinningState};
use super::morph::{ActiveMorph, MorphAtlas, MAX_ACTIVE_MORPHS};
use crate::renderer::arena::{GeometryAllocation, VertexLayoutId};
use crate::renderer::arena::ArenaManager;
use crate::renderer::vertex::SkinnedVertex;

const WORKGROUP_SIZE: u32 = 64;

/// Byte distance between consecutive parameter blocks in the uniform ring.
pub const PARAMS_STRIDE: u64 = 256;

/// Per-dispatch uniform block. Offsets are in 32-bit words so any 4-byte
/// aligned segment can be addressed.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct SkinningParams {
    pub source_base: u32,
    pub result_base: u32,
    pub vertex_count: u32,
    pub bone_base: u32,
    pub bone_count: u32,
    pub morph_count: u32,
    pub _padding: [u32; 2],
    pub morph_offsets: [[u32; 4]; 2],
    pub morph_weights: [[f32; 4]; 2],
}

impl SkinningParams {
    pub fn new(
        source: GeometryAllocation,
        result: GeometryAllocation,
        vertex_count: u32,
        bone_base: u32,
        bone_count: u32,
        morphs: &[ActiveMorph],
    ) -> Self {
        let mut params = Self {
            source_base: (source.vertices.offset / 4) as u32,
            result_base: (result.vertices.offset / 4) as u32,
            vertex_count,
            bone_base,
            bone_count,
            morph_count: morphs.len().min(MAX_ACTIVE_MORPHS) as u32,
            _padding: [0; 2],
            morph_offsets: [[0; 4]; 2],
            morph_weights: [[0.0; 4]; 2],
        };
        for (i, morph) in morphs.iter().take(MAX_ACTIVE_MORPHS).enumerate() {
            params.morph_offsets[i / 4][i % 4] = morph.atlas_offset_texels;
            params.morph_weights[i / 4][i % 4] = morph.weight;
        }
        params
    }

    pub fn workgroups(&self) -> u32 {
        self.vertex_count.div_ceil(WORKGROUP_SIZE)
    }
}

/// Identity of every buffer referenced by the cached bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindingKey {
    source_epoch: u64,
    result_epoch: u64,
    atlas_epoch: u64,
    palette_capacity: u64,
    params_capacity: u64,
}

/// Compute pipeline that writes deformed vertices into result segments.
pub struct ComputeSkinner {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    bind_group: Option<(BindingKey, wgpu::BindGroup)>,
    palette_buffer: wgpu::Buffer,
    palette_capacity: u64,
    params_buffer: wgpu::Buffer,
    params_capacity: u64,
    palette_scratch: Vec<[[f32; 4]; 4]>,
    params_scratch: Vec<u8>,
}

impl ComputeSkinner {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, initial_instances: u32, max_bones: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Skinning"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "../../shader/skinning.wgsl"
            ))),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SkinningBindLayout"),
            entries: &[
                storage(0, true),
                storage(1, false),
                storage(2, true),
                storage(3, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(mem::size_of::<SkinningParams>() as u64),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SkinningPipelineLayout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("SkinningPipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("skin"),
            compilation_options: Default::default(),
            cache: None,
        });
        log::debug!("Created skinning compute pipeline");

        let instances = initial_instances.max(1) as u64;
        let palette_capacity = instances * max_bones.max(1) as u64;
        let params_capacity = instances;

        Self {
            palette_buffer: create_palette_buffer(device, palette_capacity),
            params_buffer: create_params_buffer(device, params_capacity),
            device: device.clone(),
            queue: queue.clone(),
            pipeline,
            bind_layout,
            bind_group: None,
            palette_capacity,
            params_capacity,
            palette_scratch: Vec::new(),
            params_scratch: Vec::new(),
        }
    }

    pub(crate) fn dispatch<'a>(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        arenas: &ArenaManager,
        atlas: &MorphAtlas,
        instances: impl IntoIterator<Item = &'a mut SkinnedInstance>,
    ) -> u32 {
        let mut pending: Vec<&mut SkinnedInstance> = instances
            .into_iter()
            .filter(|instance| instance.state() == SkinningState::Uploading)
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let source = arenas.arena(VertexLayoutId::SkinnedSource);
        let result = arenas.arena(VertexLayoutId::SkinningResult);
        let (Some(source), Some(result)) = (source, result) else {
            log::warn!("Skipping skinning dispatch: source or result arena missing");
            return 0;
        };
        let (Some(source_buffer), Some(result_buffer), Some(atlas_buffer)) = (
            source.vertices().gpu_buffer(),
            result.vertices().gpu_buffer(),
            atlas.buffer().gpu_buffer(),
        ) else {
            log::warn!("Skipping skinning dispatch: arenas are not GPU backed");
            return 0;
        };

        self.palette_scratch.clear();
        self.params_scratch.clear();
        let mut workgroups = Vec::with_capacity(pending.len());
        for instance in &pending {
            let prototype = instance.prototype();
            let bone_base = self.palette_scratch.len() as u32;
            self.palette_scratch.extend(instance.palette().to_gpu());
            if instance.palette().is_empty() {
                self.palette_scratch.push(Mat4::IDENTITY.to_cols_array_2d());
            }

            let params = SkinningParams::new(
                prototype.source().allocation(),
                instance.result().allocation(),
                prototype.vertex_count(),
                bone_base,
                instance.palette().len(),
                instance.morphs().active(),
            );
            workgroups.push(params.workgroups());

            let start = self.params_scratch.len();
            self.params_scratch.extend_from_slice(bytemuck::bytes_of(&params));
            self.params_scratch.resize(start + PARAMS_STRIDE as usize, 0);
        }

        self.reserve(
            self.palette_scratch.len() as u64,
            pending.len() as u64,
        );
        self.queue.write_buffer(
            &self.palette_buffer,
            0,
            bytemuck::cast_slice(&self.palette_scratch),
        );
        self.queue
            .write_buffer(&self.params_buffer, 0, &self.params_scratch);

        let key = BindingKey {
            source_epoch: source.epoch(),
            result_epoch: result.epoch(),
            atlas_epoch: atlas.epoch(),
            palette_capacity: self.palette_capacity,
            params_capacity: self.params_capacity,
        };
        if self.bind_group.as_ref().map(|(cached, _)| *cached) != Some(key) {
            let group = self.create_bind_group(source_buffer, result_buffer, atlas_buffer);
            self.bind_group = Some((key, group));
        }
        let Some((_, bind_group)) = self.bind_group.as_ref() else {
            return 0;
        };

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("SkinningPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            for (slot, (instance, groups)) in pending.iter_mut().zip(&workgroups).enumerate() {
                let offset = (slot as u64 * PARAMS_STRIDE) as u32;
                pass.set_bind_group(0, bind_group, &[offset]);
                if *groups > 0 {
                    pass.dispatch_workgroups(*groups, 1, 1);
                }
                instance.mark_dispatched();
            }
        }

        // later commands on this encoder observe the writes
        for instance in &mut pending {
            instance.mark_readable();
        }
        pending.len() as u32
    }

    fn reserve(&mut self, matrices: u64, instances: u64) {
        if matrices > self.palette_capacity {
            let new_capacity = grown_capacity(self.palette_capacity, matrices);
            log::info!(
                "Growing bone palette buffer: {} -> {}",
                self.palette_capacity,
                new_capacity
            );
            self.palette_buffer = create_palette_buffer(&self.device, new_capacity);
            self.palette_capacity = new_capacity;
        }
        if instances > self.params_capacity {
            let new_capacity = grown_capacity(self.params_capacity, instances);
            log::info!(
                "Growing skinning params buffer: {} -> {}",
                self.params_capacity,
                new_capacity
            );
            self.params_buffer = create_params_buffer(&self.device, new_capacity);
            self.params_capacity = new_capacity;
        }
    }

    fn create_bind_group(
        &self,
        source: &wgpu::Buffer,
        result: &wgpu::Buffer,
        atlas: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SkinningBindGroup"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: source.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: result.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.palette_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: atlas.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.params_buffer,
                        offset: 0,
                        size: NonZeroU64::new(mem::size_of::<SkinningParams>() as u64),
                    }),
                },
            ],
        })
    }
}

fn grown_capacity(current: u64, required: u64) -> u64 {
    required.max(current * 2).max(1)
}

fn create_palette_buffer(device: &wgpu::Device, matrices: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("BonePaletteBuffer"),
        size: matrices * mem::size_of::<[[f32; 4]; 4]>() as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_params_buffer(device: &wgpu::Device, slots: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("SkinningParamsBuffer"),
        size: slots * PARAMS_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Word layout the shader assumes for source vertices.
const _: () = assert!(SkinnedVertex::WORDS == 16);
