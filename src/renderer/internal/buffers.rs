use std::mem;
use std::num::NonZeroU64;

use crate::renderer::objects::{MaterialData, ObjectData};
use crate::renderer::uniforms::{CameraUniform, CAMERA_SLOT_STRIDE};

/// Camera slot written by each pass, so opaque and translucent work can be
/// encoded into one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSlot {
    Opaque = 0,
    Translucent = 1,
}

impl CameraSlot {
    pub fn offset(self) -> u32 {
        (self as u64 * CAMERA_SLOT_STRIDE) as u32
    }
}

pub(crate) struct CameraBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
}

impl CameraBuffer {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CameraBuffer"),
            size: CAMERA_SLOT_STRIDE * 2,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CameraBindLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(mem::size_of::<CameraUniform>() as u64),
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CameraBindGroup"),
            layout: &bind_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: Self::slot_binding(&buffer),
            }],
        });

        Self {
            buffer,
            bind_group,
            bind_layout,
        }
    }

    /// One slot of the buffer, for bind groups that select it by dynamic offset.
    pub(crate) fn slot_binding(buffer: &wgpu::Buffer) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer,
            offset: 0,
            size: NonZeroU64::new(mem::size_of::<CameraUniform>() as u64),
        })
    }

    pub(crate) fn write(&self, queue: &wgpu::Queue, slot: CameraSlot, camera: &CameraUniform) {
        queue.write_buffer(
            &self.buffer,
            slot.offset() as u64,
            bytemuck::bytes_of(camera),
        );
    }
}

/// Frame material table, indexed by `ObjectData::material_index`.
pub(crate) struct DynamicMaterialsBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) capacity: u32,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
    scratch: Vec<MaterialData>,
}

impl DynamicMaterialsBuffer {
    pub(crate) fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MaterialsBindLayout"),
            entries: &[read_only_storage_entry(
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            )],
        });

        let buffer = create_storage_buffer::<MaterialData>(device, "MaterialsBuffer", capacity);
        let bind_group = create_storage_bind_group(device, "MaterialsBindGroup", &bind_layout, &buffer);

        Self {
            buffer,
            capacity,
            bind_group,
            bind_layout,
            scratch: Vec::with_capacity(capacity as usize),
        }
    }

    /// Uploads the frame's deduplicated material list.
    pub(crate) fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, materials: &[crate::renderer::Material]) {
        self.scratch.clear();
        self.scratch
            .extend(materials.iter().map(MaterialData::from_material));

        let required = self.scratch.len() as u32;
        if required > self.capacity {
            self.grow(device, required);
        }

        if !self.scratch.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&self.scratch));
        }
    }

    fn grow(&mut self, device: &wgpu::Device, required: u32) {
        let new_capacity = required.max(self.capacity * 2).max(1);
        log::info!(
            "Growing materials buffer: {} -> {}",
            self.capacity,
            new_capacity
        );

        self.buffer = create_storage_buffer::<MaterialData>(device, "MaterialsBuffer", new_capacity);
        self.bind_group =
            create_storage_bind_group(device, "MaterialsBindGroup", &self.bind_layout, &self.buffer);
        self.capacity = new_capacity;
    }
}

/// Per-instance records for every draw of the frame. The opaque pass fills
/// the front of the buffer and the translucent pass appends behind it.
pub(crate) struct DynamicObjectsBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) capacity: u32,
    pub(crate) bind_group: wgpu::BindGroup,
    pub(crate) bind_layout: wgpu::BindGroupLayout,
    pub(crate) scratch: Vec<ObjectData>,
}

impl DynamicObjectsBuffer {
    pub(crate) fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ObjectsBindLayout"),
            entries: &[read_only_storage_entry(
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            )],
        });

        let buffer = create_storage_buffer::<ObjectData>(device, "ObjectsBuffer", capacity);
        let bind_group = create_storage_bind_group(device, "ObjectsBindGroup", &bind_layout, &buffer);

        Self {
            buffer,
            capacity,
            bind_group,
            bind_layout,
            scratch: Vec::with_capacity(capacity as usize),
        }
    }

    /// Grows ahead of the first pass so both passes bind the same buffer.
    pub(crate) fn reserve(&mut self, device: &wgpu::Device, required: u32) {
        if required > self.capacity {
            self.grow(device, required);
        }
    }

    /// Writes `scratch` starting at instance `first`.
    pub(crate) fn flush(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, first: u32) {
        let required = first + self.scratch.len() as u32;
        if required > self.capacity {
            log::warn!("Objects buffer grew mid-frame; earlier passes keep the old buffer");
            self.grow(device, required);
        }

        if !self.scratch.is_empty() {
            let offset = first as u64 * mem::size_of::<ObjectData>() as u64;
            queue.write_buffer(&self.buffer, offset, bytemuck::cast_slice(&self.scratch));
        }
    }

    fn grow(&mut self, device: &wgpu::Device, required: u32) {
        let new_capacity = required.max(self.capacity * 2);
        log::info!(
            "Growing objects buffer: {} -> {}",
            self.capacity,
            new_capacity
        );

        self.buffer = create_storage_buffer::<ObjectData>(device, "ObjectsBuffer", new_capacity);
        self.bind_group =
            create_storage_bind_group(device, "ObjectsBindGroup", &self.bind_layout, &self.buffer);
        self.capacity = new_capacity;
    }
}

pub(crate) fn read_only_storage_entry(visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_storage_buffer<T>(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (capacity as usize * mem::size_of::<T>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_storage_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_slots_respect_uniform_offset_alignment() {
        let alignment = wgpu::Limits::default().min_uniform_buffer_offset_alignment;
        assert_eq!(CameraSlot::Opaque.offset(), 0);
        assert_eq!(CameraSlot::Translucent.offset() % alignment, 0);
    }
}
