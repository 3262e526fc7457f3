use std::collections::HashMap;

use crate::asset::Handle;
use crate::renderer::texture::{Texture, TextureRegistry, TextureRole};

/// Base color bind groups for the built-in shader, one per distinct texture
/// handle. `None` resolves to the white fallback.
pub(crate) struct MaterialTextureBinder {
    pub(crate) layout: wgpu::BindGroupLayout,
    groups: HashMap<Option<Handle<Texture>>, wgpu::BindGroup>,
}

impl MaterialTextureBinder {
    pub(crate) fn new(layout: wgpu::BindGroupLayout) -> Self {
        Self {
            layout,
            groups: HashMap::new(),
        }
    }

    pub(crate) fn bind_group(
        &mut self,
        device: &wgpu::Device,
        textures: &TextureRegistry,
        handle: Option<Handle<Texture>>,
    ) -> &wgpu::BindGroup {
        let layout = &self.layout;
        self.groups.entry(handle).or_insert_with(|| {
            let texture = textures.resolve(handle, TextureRole::BaseColor);
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("MaterialTextureBindGroup"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                ],
            })
        })
    }
}
