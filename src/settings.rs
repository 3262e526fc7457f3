use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub arena: ArenaSettings,
    #[serde(default)]
    pub batching: BatchingSettings,
    #[serde(default)]
    pub skinning: SkinningSettings,
    #[serde(default)]
    pub targets: TargetSettings,
}

impl EngineSettings {
    pub fn load() -> Self {
        Self::load_from_path("engine_settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default engine settings.",
                    path, err
                );
                EngineSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Engine settings file {:?} not found. Using default settings.",
                    path
                );
                EngineSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default engine settings.",
                    path, err
                );
                EngineSettings::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<EngineSettings>(contents)?;
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        let arena_defaults = ArenaSettings::default();
        if self.arena.max_bytes == 0 {
            warn!("Arena ceiling must be greater than zero. Using default value.");
            self.arena.max_bytes = arena_defaults.max_bytes;
        }
        if self.arena.initial_vertex_bytes == 0
            || self.arena.initial_vertex_bytes > self.arena.max_bytes
        {
            warn!("Initial vertex arena size is out of range. Using default value.");
            self.arena.initial_vertex_bytes =
                arena_defaults.initial_vertex_bytes.min(self.arena.max_bytes);
        }
        if self.arena.initial_index_bytes == 0
            || self.arena.initial_index_bytes > self.arena.max_bytes
        {
            warn!("Initial index arena size is out of range. Using default value.");
            self.arena.initial_index_bytes =
                arena_defaults.initial_index_bytes.min(self.arena.max_bytes);
        }

        if self.batching.initial_entry_capacity == 0 {
            warn!("Initial entry capacity must be greater than zero. Using default value.");
            self.batching.initial_entry_capacity = BatchingSettings::default().initial_entry_capacity;
        }
        if self.batching.max_instances_per_draw == 0 {
            warn!("Max instances per draw must be greater than zero. Using default value.");
            self.batching.max_instances_per_draw = BatchingSettings::default().max_instances_per_draw;
        }

        if self.skinning.max_bones == 0 {
            warn!("Bone palette capacity must be greater than zero. Using default value.");
            self.skinning.max_bones = SkinningSettings::default().max_bones;
        }
        if !(self.skinning.morph_weight_epsilon >= 0.0) {
            warn!("Morph weight epsilon must be non-negative. Using default value.");
            self.skinning.morph_weight_epsilon = SkinningSettings::default().morph_weight_epsilon;
        }
        if self.skinning.initial_palette_capacity == 0 {
            self.skinning.initial_palette_capacity =
                SkinningSettings::default().initial_palette_capacity;
        }

        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaSettings {
    #[serde(default = "ArenaSettings::default_initial_vertex_bytes")]
    pub initial_vertex_bytes: u64,
    #[serde(default = "ArenaSettings::default_initial_index_bytes")]
    pub initial_index_bytes: u64,
    /// Hard ceiling for any single arena buffer.
    #[serde(default = "ArenaSettings::default_max_bytes")]
    pub max_bytes: u64,
}

impl ArenaSettings {
    const fn default_initial_vertex_bytes() -> u64 {
        4 * 1024 * 1024
    }

    const fn default_initial_index_bytes() -> u64 {
        1024 * 1024
    }

    const fn default_max_bytes() -> u64 {
        128 * 1024 * 1024
    }
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            initial_vertex_bytes: Self::default_initial_vertex_bytes(),
            initial_index_bytes: Self::default_initial_index_bytes(),
            max_bytes: Self::default_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingSettings {
    #[serde(default = "BatchingSettings::default_initial_entry_capacity")]
    pub initial_entry_capacity: u32,
    #[serde(default = "BatchingSettings::default_max_instances_per_draw")]
    pub max_instances_per_draw: u32,
}

impl BatchingSettings {
    const fn default_initial_entry_capacity() -> u32 {
        1024
    }

    const fn default_max_instances_per_draw() -> u32 {
        1024
    }
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            initial_entry_capacity: Self::default_initial_entry_capacity(),
            max_instances_per_draw: Self::default_max_instances_per_draw(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkinningSettings {
    #[serde(default = "SkinningSettings::default_max_bones")]
    pub max_bones: u32,
    #[serde(default = "SkinningSettings::default_morph_weight_epsilon")]
    pub morph_weight_epsilon: f32,
    /// Number of instances the palette/parameter buffers are sized for up front.
    #[serde(default = "SkinningSettings::default_initial_palette_capacity")]
    pub initial_palette_capacity: u32,
}

impl SkinningSettings {
    const fn default_max_bones() -> u32 {
        256
    }

    const fn default_morph_weight_epsilon() -> f32 {
        1e-4
    }

    const fn default_initial_palette_capacity() -> u32 {
        64
    }
}

impl Default for SkinningSettings {
    fn default() -> Self {
        Self {
            max_bones: Self::default_max_bones(),
            morph_weight_epsilon: Self::default_morph_weight_epsilon(),
            initial_palette_capacity: Self::default_initial_palette_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSettings {
    #[serde(default)]
    pub color_format: ColorFormatSetting,
    #[serde(default)]
    pub depth_format: DepthFormatSetting,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormatSetting {
    #[default]
    Bgra8UnormSrgb,
    Rgba8UnormSrgb,
    Rgba16Float,
}

impl ColorFormatSetting {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            ColorFormatSetting::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            ColorFormatSetting::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            ColorFormatSetting::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormatSetting {
    Depth24Plus,
    #[default]
    Depth32Float,
}

impl DepthFormatSetting {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            DepthFormatSetting::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            DepthFormatSetting::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> EngineSettings {
        EngineSettings {
            arena: ArenaSettings {
                initial_vertex_bytes: 0,
                initial_index_bytes: 0,
                max_bytes: 0,
            },
            batching: BatchingSettings {
                initial_entry_capacity: 0,
                max_instances_per_draw: 0,
            },
            skinning: SkinningSettings {
                max_bones: 0,
                morph_weight_epsilon: -1.0,
                initial_palette_capacity: 0,
            },
            targets: TargetSettings::default(),
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = EngineSettings::default();

        assert_eq!(validated.arena.max_bytes, defaults.arena.max_bytes);
        assert_eq!(
            validated.arena.initial_vertex_bytes,
            defaults.arena.initial_vertex_bytes
        );
        assert_eq!(
            validated.batching.max_instances_per_draw,
            defaults.batching.max_instances_per_draw
        );
        assert_eq!(validated.skinning.max_bones, defaults.skinning.max_bones);
        assert_eq!(
            validated.skinning.morph_weight_epsilon,
            defaults.skinning.morph_weight_epsilon
        );
    }

    #[test]
    fn initial_sizes_never_exceed_ceiling() {
        let mut settings = EngineSettings::default();
        settings.arena.max_bytes = 1024;
        settings.arena.initial_vertex_bytes = 4096;
        let validated = settings.validate();
        assert!(validated.arena.initial_vertex_bytes <= 1024);
        assert!(validated.arena.initial_index_bytes <= 1024);
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let settings =
            EngineSettings::from_json(r#"{ "batching": { "max_instances_per_draw": 16 } }"#)
                .expect("valid json");
        assert_eq!(settings.batching.max_instances_per_draw, 16);
        assert_eq!(
            settings.batching.initial_entry_capacity,
            BatchingSettings::default().initial_entry_capacity
        );
        assert_eq!(settings.skinning.max_bones, 256);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = EngineSettings::load_from_path("definitely/not/here.json");
        assert_eq!(settings.arena.max_bytes, ArenaSettings::default().max_bytes);
    }

    #[test]
    fn format_settings_map_to_wgpu() {
        assert_eq!(
            ColorFormatSetting::Rgba16Float.to_wgpu(),
            wgpu::TextureFormat::Rgba16Float
        );
        assert_eq!(
            DepthFormatSetting::default().to_wgpu(),
            wgpu::TextureFormat::Depth32Float
        );
    }
}
