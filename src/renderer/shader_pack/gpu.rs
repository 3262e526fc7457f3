use std::collections::HashMap;
use std::mem;
use std::num::NonZeroU64;

use glam::Mat3;

use super::{ExternalProgram, ProgramId, Semantic, SlotKind, SlotTable};
use crate::asset::Handle;
use crate::renderer::internal::{MeshPipelines, PipelineKey, TargetFormats};
use crate::renderer::material::Material;
use crate::renderer::texture::{Texture, TextureRegistry, TextureRole};
use crate::renderer::uniforms::CAMERA_SLOT_STRIDE;

/// Byte distance between per-draw normal matrices.
pub const NORMAL_SLOT_STRIDE: u64 = 256;
const NORMAL_MATRIX_BYTES: u64 = mem::size_of::<[[f32; 4]; 3]>() as u64;

/// Per-instance normal matrices bound by dynamic offset, for programs that
/// read the normal matrix from a uniform instead of the objects buffer.
pub(crate) struct NormalMatrixRing {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) capacity: u32,
    scratch: Vec<u8>,
}

impl NormalMatrixRing {
    pub(crate) fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Self::create_buffer(device, capacity),
            capacity,
            scratch: Vec::new(),
        }
    }

    fn create_buffer(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("NormalMatrixRing"),
            size: capacity as u64 * NORMAL_SLOT_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Returns true when the buffer was replaced.
    pub(crate) fn reserve(&mut self, device: &wgpu::Device, required: u32) -> bool {
        if required <= self.capacity {
            return false;
        }
        let new_capacity = required.max(self.capacity * 2);
        log::info!(
            "Growing normal matrix ring: {} -> {}",
            self.capacity,
            new_capacity
        );
        self.buffer = Self::create_buffer(device, new_capacity);
        self.capacity = new_capacity;
        true
    }

    /// Writes `normals` into consecutive slots starting at `first`.
    pub(crate) fn write<'a>(
        &mut self,
        queue: &wgpu::Queue,
        first: u32,
        normals: impl IntoIterator<Item = &'a Mat3>,
    ) {
        self.scratch.clear();
        for normal in normals {
            let [c0, c1, c2] = normal.to_cols_array_2d();
            let columns = [
                [c0[0], c0[1], c0[2], 0.0f32],
                [c1[0], c1[1], c1[2], 0.0],
                [c2[0], c2[1], c2[2], 0.0],
            ];
            let start = self.scratch.len();
            self.scratch.extend_from_slice(bytemuck::bytes_of(&columns));
            self.scratch.resize(start + NORMAL_SLOT_STRIDE as usize, 0);
        }
        if !self.scratch.is_empty() {
            queue.write_buffer(
                &self.buffer,
                first as u64 * NORMAL_SLOT_STRIDE,
                &self.scratch,
            );
        }
    }

    pub(crate) fn offset(slot: u32) -> u32 {
        (slot as u64 * NORMAL_SLOT_STRIDE) as u32
    }
}

/// Engine buffers an external program's bind groups reference. `generation`
/// changes whenever one of them is replaced.
pub(crate) struct ExternalResources<'a> {
    pub(crate) camera: &'a wgpu::Buffer,
    pub(crate) objects: &'a wgpu::Buffer,
    pub(crate) materials: &'a wgpu::Buffer,
    pub(crate) normals: &'a wgpu::Buffer,
    pub(crate) generation: u64,
}

type TextureKey = [Option<Handle<Texture>>; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    group: u32,
    textures: Option<TextureKey>,
    generation: u64,
}

/// Layouts, pipelines and bind groups derived from one program's slot table.
pub(crate) struct ExternalProgramGpu {
    id: ProgramId,
    slots: SlotTable,
    layouts: Vec<wgpu::BindGroupLayout>,
    pipelines: MeshPipelines,
    groups: HashMap<GroupKey, wgpu::BindGroup>,
}

impl ExternalProgramGpu {
    /// `None` when the program declares a binding the engine cannot feed.
    pub(crate) fn new(
        device: &wgpu::Device,
        program: &ExternalProgram,
        formats: TargetFormats,
    ) -> Option<Self> {
        let slots = program.slots().clone();
        if !slots.is_complete() {
            log::warn!(
                "{} cannot be fully bound; drawing with the built-in shader",
                program.id()
            );
            return None;
        }

        let group_count = slots.max_group().map_or(0, |max| max + 1);
        let layouts: Vec<wgpu::BindGroupLayout> = (0..group_count)
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
                    .group_bindings(group)
                    .filter_map(|binding| {
                        binding
                            .semantic
                            .map(|semantic| layout_entry(binding.location.binding, semantic))
                    })
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("ExternalBindGroupLayout"),
                    entries: &entries,
                })
            })
            .collect();

        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ExternalPipelineLayout"),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ExternalShader"),
            source: wgpu::ShaderSource::Wgsl(program.source().to_owned().into()),
        });

        log::debug!(
            "Prepared {} with {} bind groups",
            program.id(),
            group_count
        );

        Some(Self {
            id: program.id(),
            slots,
            layouts,
            pipelines: MeshPipelines::new("ExternalPipeline", pipeline_layout, shader, formats),
            groups: HashMap::new(),
        })
    }

    pub(crate) fn id(&self) -> ProgramId {
        self.id
    }

    pub(crate) fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub(crate) fn group_count(&self) -> u32 {
        self.layouts.len() as u32
    }

    pub(crate) fn pipeline(&mut self, device: &wgpu::Device, key: PipelineKey) -> &wgpu::RenderPipeline {
        self.pipelines.get(device, key)
    }

    /// Dynamic offsets for `group`, in binding order.
    pub(crate) fn dynamic_offsets(&self, group: u32, camera_offset: u32, normal_slot: u32) -> Vec<u32> {
        self.slots
            .group_bindings(group)
            .filter_map(|binding| match binding.semantic {
                Some(Semantic::Camera) => Some(camera_offset),
                Some(Semantic::NormalMatrix) => Some(NormalMatrixRing::offset(normal_slot)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn bind_group(
        &mut self,
        device: &wgpu::Device,
        group: u32,
        resources: &ExternalResources<'_>,
        textures: &TextureRegistry,
        material: &Material,
    ) -> &wgpu::BindGroup {
        let uses_textures = self.slots.group_bindings(group).any(|binding| {
            matches!(
                binding.semantic.map(Semantic::kind),
                Some(SlotKind::Texture | SlotKind::Sampler)
            )
        });
        let key = GroupKey {
            group,
            textures: uses_textures.then_some([
                material.base_color_texture,
                material.normal_texture,
                material.specular_texture,
            ]),
            generation: resources.generation,
        };

        let slots = &self.slots;
        let layouts = &self.layouts;
        self.groups.entry(key).or_insert_with(|| {
            let entries: Vec<wgpu::BindGroupEntry> = slots
                .group_bindings(group)
                .filter_map(|binding| {
                    let semantic = binding.semantic?;
                    Some(wgpu::BindGroupEntry {
                        binding: binding.location.binding,
                        resource: resource_for(semantic, resources, textures, material),
                    })
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("ExternalBindGroup"),
                layout: &layouts[group as usize],
                entries: &entries,
            })
        })
    }

    /// Drops bind groups built for older buffers or textures.
    pub(crate) fn retain_generation(&mut self, generation: u64) {
        self.groups.retain(|key, _| key.generation == generation);
    }
}

fn layout_entry(binding: u32, semantic: Semantic) -> wgpu::BindGroupLayoutEntry {
    let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
    let ty = match semantic {
        Semantic::Camera | Semantic::NormalMatrix => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: None,
        },
        Semantic::Objects | Semantic::Materials => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        Semantic::BaseColorTexture | Semantic::NormalTexture | Semantic::SpecularTexture => {
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            }
        }
        Semantic::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    }
}

fn resource_for<'a>(
    semantic: Semantic,
    resources: &ExternalResources<'a>,
    textures: &'a TextureRegistry,
    material: &Material,
) -> wgpu::BindingResource<'a> {
    match semantic {
        Semantic::Camera => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: resources.camera,
            offset: 0,
            size: NonZeroU64::new(CAMERA_SLOT_STRIDE),
        }),
        Semantic::NormalMatrix => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: resources.normals,
            offset: 0,
            size: NonZeroU64::new(NORMAL_MATRIX_BYTES),
        }),
        Semantic::Objects => resources.objects.as_entire_binding(),
        Semantic::Materials => resources.materials.as_entire_binding(),
        Semantic::BaseColorTexture => wgpu::BindingResource::TextureView(
            &textures
                .resolve(material.base_color_texture, TextureRole::BaseColor)
                .view,
        ),
        Semantic::NormalTexture => wgpu::BindingResource::TextureView(
            &textures
                .resolve(material.normal_texture, TextureRole::Normal)
                .view,
        ),
        Semantic::SpecularTexture => wgpu::BindingResource::TextureView(
            &textures
                .resolve(material.specular_texture, TextureRole::Specular)
                .view,
        ),
        Semantic::Sampler => wgpu::BindingResource::Sampler(
            &textures
                .resolve(material.base_color_texture, TextureRole::BaseColor)
                .sampler,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_slots_respect_uniform_offset_alignment() {
        let alignment = wgpu::Limits::default().min_uniform_buffer_offset_alignment;
        assert_eq!(NormalMatrixRing::offset(3) % alignment, 0);
        assert!(NORMAL_MATRIX_BYTES <= NORMAL_SLOT_STRIDE);
    }

    #[test]
    fn dynamic_bindings_match_per_draw_semantics() {
        let camera = layout_entry(0, Semantic::Camera);
        let texture = layout_entry(1, Semantic::BaseColorTexture);
        assert!(matches!(
            camera.ty,
            wgpu::BindingType::Buffer {
                has_dynamic_offset: true,
                ..
            }
        ));
        assert!(matches!(texture.ty, wgpu::BindingType::Texture { .. }));
    }
}
