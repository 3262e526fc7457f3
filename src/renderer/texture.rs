// renderer/texture.rs

use crate::asset::{AssetCache, Handle};

/// Sampled texture as seen by materials: a view plus the sampler used with
/// it. The backing `wgpu::Texture` is kept alive when the engine created it.
#[derive(Debug)]
pub struct Texture {
    pub texture: Option<wgpu::Texture>,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl Texture {
    /// Wraps a view created and owned by the host.
    pub fn from_view(device: &wgpu::Device, view: wgpu::TextureView) -> Self {
        Self {
            texture: None,
            view,
            sampler: Self::repeat_sampler(device, None),
        }
    }

    /// Create a solid color 1x1 texture
    pub fn from_color(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color: [u8; 4],
        srgb: bool,
        label: Option<&str>,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let (format, view_formats): (_, &[wgpu::TextureFormat]) = if srgb {
            (
                wgpu::TextureFormat::Rgba8Unorm,
                &[wgpu::TextureFormat::Rgba8UnormSrgb],
            )
        } else {
            (wgpu::TextureFormat::Rgba8Unorm, &[])
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats,
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &color,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            format: view_formats.first().copied().or(Some(format)),
            ..Default::default()
        });

        Self {
            texture: Some(texture),
            view,
            sampler: Self::repeat_sampler(device, label),
        }
    }

    /// Create default white texture (1x1)
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::from_color(device, queue, [255, 255, 255, 255], true, Some("White"))
    }

    /// Create default normal map (1x1, pointing up)
    pub fn default_normal(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        // Normal pointing straight up: (0, 0, 1) -> (128, 128, 255) in texture space
        Self::from_color(device, queue, [128, 128, 255, 255], false, Some("DefaultNormal"))
    }

    /// Create default specular map (1x1, no specular response)
    pub fn default_specular(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::from_color(device, queue, [0, 0, 0, 255], false, Some("DefaultSpecular"))
    }

    fn repeat_sampler(device: &wgpu::Device, label: Option<&str>) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            label,
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }
}

/// Which fallback a missing texture resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRole {
    BaseColor,
    Normal,
    Specular,
}

/// Host-registered textures plus per-role 1x1 fallbacks.
pub struct TextureRegistry {
    textures: AssetCache<Texture>,
    white: Texture,
    normal: Texture,
    specular: Texture,
}

impl TextureRegistry {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            textures: AssetCache::new(),
            white: Texture::white(device, queue),
            normal: Texture::default_normal(device, queue),
            specular: Texture::default_specular(device, queue),
        }
    }

    pub fn register(&mut self, texture: Texture) -> Handle<Texture> {
        let handle = self.textures.insert(texture);
        log::debug!("Registered texture {:?}", handle);
        handle
    }

    pub fn register_view(
        &mut self,
        device: &wgpu::Device,
        view: wgpu::TextureView,
    ) -> Handle<Texture> {
        self.register(Texture::from_view(device, view))
    }

    pub fn get(&self, handle: Handle<Texture>) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn fallback(&self, role: TextureRole) -> &Texture {
        match role {
            TextureRole::BaseColor => &self.white,
            TextureRole::Normal => &self.normal,
            TextureRole::Specular => &self.specular,
        }
    }

    /// Resolves a material's optional handle, falling back per role when it is
    /// absent or unknown.
    pub fn resolve(&self, handle: Option<Handle<Texture>>, role: TextureRole) -> &Texture {
        handle
            .and_then(|handle| self.textures.get(handle))
            .unwrap_or_else(|| self.fallback(role))
    }
}
