pub mod arena;
pub mod depth;
pub mod frame;
pub mod internal;
pub mod material;
pub mod objects;
pub mod primitives;
pub mod renderer;
pub mod shader_pack;
pub mod skinning;
pub mod texture;
pub mod uniforms;
pub mod vertex;

pub use depth::Depth;
pub use material::{Material, RenderType};
pub use primitives::{bar_mesh, cube_mesh};
pub use renderer::FrameRenderer;
pub use uniforms::{AmbientLight, CameraUniform};
pub use vertex::{SkinnedVertex, Vertex};
