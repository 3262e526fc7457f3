use std::collections::HashMap;

use crate::renderer::material::RenderType;
use crate::renderer::Vertex;

/// Render state variants a mesh shader needs. Cutout and opaque share blend
/// state but are kept apart so their draw order stays visible in captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub(crate) render_type: RenderType,
    pub(crate) double_sided: bool,
}

impl PipelineKey {
    pub(crate) fn new(render_type: RenderType, double_sided: bool) -> Self {
        Self {
            render_type,
            double_sided,
        }
    }
}

/// Attachment formats every mesh pipeline renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TargetFormats {
    pub(crate) color: wgpu::TextureFormat,
    pub(crate) depth: wgpu::TextureFormat,
}

/// Lazily created pipelines for one shader module and layout.
pub(crate) struct MeshPipelines {
    label: String,
    layout: wgpu::PipelineLayout,
    shader: wgpu::ShaderModule,
    formats: TargetFormats,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl MeshPipelines {
    pub(crate) fn new(
        label: &str,
        layout: wgpu::PipelineLayout,
        shader: wgpu::ShaderModule,
        formats: TargetFormats,
    ) -> Self {
        Self {
            label: label.to_owned(),
            layout,
            shader,
            formats,
            pipelines: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, device: &wgpu::Device, key: PipelineKey) -> &wgpu::RenderPipeline {
        let label = &self.label;
        let layout = &self.layout;
        let shader = &self.shader;
        let formats = self.formats;
        self.pipelines.entry(key).or_insert_with(|| {
            log::debug!("Creating {} pipeline for {:?}", label, key);
            create_mesh_pipeline(device, label, layout, shader, key, formats)
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.pipelines.len()
    }
}

fn create_mesh_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    key: PipelineKey,
    formats: TargetFormats,
) -> wgpu::RenderPipeline {
    let blend = if key.render_type.uses_alpha_blending() {
        Some(wgpu::BlendState::ALPHA_BLENDING)
    } else {
        Some(wgpu::BlendState::REPLACE)
    };
    let cull_mode = if key.double_sided {
        None
    } else {
        Some(wgpu::Face::Back)
    };
    // translucent surfaces test against depth but never occlude each other
    let depth_write = !key.render_type.uses_alpha_blending();

    let targets = [Some(wgpu::ColorTargetState {
        format: formats.color,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    })];

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode,
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: formats.depth,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Layout of the built-in material texture group: base color + sampler.
pub(crate) fn base_color_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("TextureBindGroupLayout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_distinguish_render_type_and_sidedness() {
        let keys: HashSet<_> = RenderType::ALL
            .iter()
            .flat_map(|&ty| [PipelineKey::new(ty, false), PipelineKey::new(ty, true)])
            .collect();
        assert_eq!(keys.len(), 6);
    }
}
