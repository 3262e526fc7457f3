// renderer/objects.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};

use crate::renderer::material::Material;

/// Per-instance record in the objects storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],         // 64 bytes
    pub normal_matrix: [[f32; 4]; 3], // 48 bytes (mat3x3 columns padded to vec4)
    pub material_index: u32,          // 4 bytes
    pub packed_light: u32,            // 4 bytes
    pub overlay: u32,                 // 4 bytes
    pub _padding: u32,                // 4 bytes (ensures 128 byte stride)
}

impl ObjectData {
    pub fn new(
        model: &Mat4,
        normal: &Mat3,
        material_index: u32,
        packed_light: u32,
        overlay: u32,
    ) -> Self {
        let [c0, c1, c2] = normal.to_cols_array_2d();
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: [
                [c0[0], c0[1], c0[2], 0.0],
                [c1[0], c1[1], c1[2], 0.0],
                [c2[0], c2[1], c2[2], 0.0],
            ],
            material_index,
            packed_light,
            overlay,
            _padding: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct MaterialData {
    pub color: [f32; 4],     // 16 bytes
    pub alpha_cutoff: f32,   // 4 bytes
    pub material_flags: u32, // 4 bytes
    pub _padding: [u32; 2],  // 8 bytes (ensures 32 byte stride)
}

impl MaterialData {
    pub fn from_material(material: &Material) -> Self {
        Self {
            color: material.color_f32(),
            alpha_cutoff: material.alpha_cutoff_f32(),
            material_flags: material.flags.bits(),
            _padding: [0; 2],
        }
    }
}

/// Packs block and sky light levels (0-15 each) the way hosts hand them
/// over: block light in the low 16 bits, sky light in the high 16 bits,
/// both scaled by 16.
pub fn pack_light(block: u8, sky: u8) -> u32 {
    ((block.min(15) as u32) << 4) | ((sky.min(15) as u32) << 20)
}

pub fn unpack_light(packed: u32) -> (u8, u8) {
    (((packed >> 4) & 0xF) as u8, ((packed >> 20) & 0xF) as u8)
}
