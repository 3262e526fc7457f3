use bytemuck::{Pod, Zeroable};
use std::mem;

/// Layout shared by static meshes and skinning results.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

#[inline]
pub fn v(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { pos, normal, uv }
}

/// Bind-pose vertex read by the skinning pass. Never bound as a vertex
/// buffer; the compute shader indexes it as 16 words per vertex.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct SkinnedVertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl SkinnedVertex {
    pub const WORDS: u32 = (mem::size_of::<SkinnedVertex>() / 4) as u32;

    pub fn rigid(vertex: Vertex, joint: u32) -> Self {
        Self {
            pos: vertex.pos,
            normal: vertex.normal,
            uv: vertex.uv,
            joints: [joint, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn vertex_stride_matches_struct_size() {
        assert_eq!(
            Vertex::layout().array_stride,
            std::mem::size_of::<Vertex>() as wgpu::BufferAddress
        );
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn skinned_vertex_is_sixteen_words() {
        assert_eq!(std::mem::size_of::<SkinnedVertex>(), 64);
        assert_eq!(SkinnedVertex::WORDS, 16);
    }
}
