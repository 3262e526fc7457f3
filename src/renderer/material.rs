use bitflags::bitflags;

use crate::asset::Handle;
use crate::renderer::texture::Texture;

/// Blend behaviour tag supplied by the material owner. Decides the bucket a
/// draw entry lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderType {
    Opaque,
    Cutout,
    Translucent,
}

impl RenderType {
    pub const ALL: [RenderType; 3] = [
        RenderType::Opaque,
        RenderType::Cutout,
        RenderType::Translucent,
    ];

    pub const fn bucket_index(self) -> usize {
        match self {
            RenderType::Opaque => 0,
            RenderType::Cutout => 1,
            RenderType::Translucent => 2,
        }
    }

    pub fn uses_alpha_blending(self) -> bool {
        matches!(self, RenderType::Translucent)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u32 {
        const USE_BASE_COLOR_TEXTURE = 1 << 0;
        const USE_NORMAL_TEXTURE = 1 << 1;
        const USE_SPECULAR_TEXTURE = 1 << 2;
        const DOUBLE_SIDED = 1 << 3;
        const ALPHA_TEST = 1 << 4;
        const ALPHA_BLEND = 1 << 5;
    }
}

/// Frame-facing material description. Plain data so it can be hashed and
/// deduplicated per frame; textures are resolved elsewhere and referenced by
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Material {
    pub render_type: RenderType,
    pub base_color: [u8; 4],
    pub flags: MaterialFlags,
    /// 0-255 -> 0.0-1.0, only meaningful for cutout.
    pub alpha_cutoff: u8,

    pub base_color_texture: Option<Handle<Texture>>,
    pub normal_texture: Option<Handle<Texture>>,
    pub specular_texture: Option<Handle<Texture>>,
}

impl Material {
    pub fn new(render_type: RenderType, color: [u8; 4]) -> Self {
        let mut flags = MaterialFlags::empty();
        match render_type {
            RenderType::Opaque => {}
            RenderType::Cutout => flags |= MaterialFlags::ALPHA_TEST,
            RenderType::Translucent => flags |= MaterialFlags::ALPHA_BLEND,
        }
        Self {
            render_type,
            base_color: color,
            flags,
            alpha_cutoff: 128,
            base_color_texture: None,
            normal_texture: None,
            specular_texture: None,
        }
    }

    pub fn opaque(color: [u8; 4]) -> Self {
        Self::new(RenderType::Opaque, color)
    }

    pub fn cutout(color: [u8; 4], alpha_cutoff: f32) -> Self {
        Self::new(RenderType::Cutout, color).with_alpha_cutoff(alpha_cutoff)
    }

    pub fn translucent(color: [u8; 4]) -> Self {
        Self::new(RenderType::Translucent, color)
    }

    pub fn white() -> Self {
        Self::opaque([255, 255, 255, 255])
    }

    pub fn with_alpha_cutoff(mut self, cutoff: f32) -> Self {
        self.alpha_cutoff = (cutoff.clamp(0.0, 1.0) * 255.0) as u8;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.flags.set(MaterialFlags::DOUBLE_SIDED, double_sided);
        self
    }

    pub fn with_base_color_texture(mut self, texture: Handle<Texture>) -> Self {
        self.base_color_texture = Some(texture);
        self.flags |= MaterialFlags::USE_BASE_COLOR_TEXTURE;
        self
    }

    pub fn with_normal_texture(mut self, texture: Handle<Texture>) -> Self {
        self.normal_texture = Some(texture);
        self.flags |= MaterialFlags::USE_NORMAL_TEXTURE;
        self
    }

    pub fn with_specular_texture(mut self, texture: Handle<Texture>) -> Self {
        self.specular_texture = Some(texture);
        self.flags |= MaterialFlags::USE_SPECULAR_TEXTURE;
        self
    }

    pub fn is_double_sided(&self) -> bool {
        self.flags.contains(MaterialFlags::DOUBLE_SIDED)
    }

    pub fn color_f32(&self) -> [f32; 4] {
        [
            self.base_color[0] as f32 / 255.0,
            self.base_color[1] as f32 / 255.0,
            self.base_color[2] as f32 / 255.0,
            self.base_color[3] as f32 / 255.0,
        ]
    }

    pub fn alpha_cutoff_f32(&self) -> f32 {
        self.alpha_cutoff as f32 / 255.0
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::white()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_type_sets_blend_flags() {
        assert!(Material::cutout([255; 4], 0.5)
            .flags
            .contains(MaterialFlags::ALPHA_TEST));
        assert!(Material::translucent([255; 4])
            .flags
            .contains(MaterialFlags::ALPHA_BLEND));
        assert!(Material::opaque([255; 4]).flags.is_empty());
    }

    #[test]
    fn alpha_cutoff_is_quantized() {
        let material = Material::cutout([255; 4], 0.5);
        assert_eq!(material.alpha_cutoff, 127);
        assert!((material.alpha_cutoff_f32() - 0.5).abs() < 0.01);
    }

    #[test]
    fn identical_materials_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Material::opaque([10, 20, 30, 255]));
        set.insert(Material::opaque([10, 20, 30, 255]));
        set.insert(Material::opaque([10, 20, 30, 255]).with_double_sided(true));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn texture_slots_set_their_flags() {
        let material = Material::opaque([255; 4])
            .with_base_color_texture(Handle::new(1))
            .with_normal_texture(Handle::new(2))
            .with_specular_texture(Handle::new(3));
        assert!(material.flags.contains(
            MaterialFlags::USE_BASE_COLOR_TEXTURE
                | MaterialFlags::USE_NORMAL_TEXTURE
                | MaterialFlags::USE_SPECULAR_TEXTURE
        ));
        assert_eq!(material.normal_texture.map(|h| h.index()), Some(2));
    }
}
