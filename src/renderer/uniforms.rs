// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// One slot of the camera uniform buffer. Each pass owns a slot padded to
/// [`CAMERA_SLOT_STRIDE`] so it can be bound with a dynamic offset.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub _padding: f32,
    pub ambient: [f32; 4],
}

pub const CAMERA_SLOT_STRIDE: u64 = 256;

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            camera_pos: [0.0, 0.0, 0.0],
            _padding: 0.0,
            ambient: [1.0, 1.0, 1.0, 1.0],
        }
    }

    pub fn from_matrices(view: Mat4, proj: Mat4, camera_pos: Vec3, ambient: [f32; 4]) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
            camera_pos: camera_pos.to_array(),
            _padding: 0.0,
            ambient,
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Ambient lighting supplied by the host once per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

impl AmbientLight {
    pub fn to_uniform(self) -> [f32; 4] {
        [self.color[0], self.color[1], self.color[2], self.intensity]
    }
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
        }
    }
}
