pub mod buffers;
pub mod context;
pub mod pipeline;
pub mod textures;

pub use buffers::CameraSlot;
pub(crate) use buffers::{CameraBuffer, DynamicMaterialsBuffer, DynamicObjectsBuffer};
pub use context::{ContextError, GpuContext, OffscreenTarget};
pub(crate) use pipeline::{base_color_layout, MeshPipelines, PipelineKey, TargetFormats};
pub(crate) use textures::MaterialTextureBinder;
