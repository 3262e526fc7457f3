//! Support for replacement shader programs the engine did not author.
//!
//! Each program is reflected once, when first registered under its
//! [`ProgramId`]. The resulting [`SlotTable`] says where the program expects
//! the camera, instance data, material table, textures and a per-draw normal
//! matrix. Anything the program does not declare is simply not uploaded.

pub mod gpu;
pub mod reflect;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub use reflect::{reflect_program, ReflectedBinding, SlotKind, SlotLocation, SlotTable};

/// Host-side identity of an external program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShaderPackError {
    #[error("failed to parse external {id}:\n{message}")]
    Parse { id: ProgramId, message: String },
    #[error("{0} has not been registered")]
    UnknownProgram(ProgramId),
}

/// Engine resources an external program may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    Camera,
    Objects,
    Materials,
    BaseColorTexture,
    NormalTexture,
    SpecularTexture,
    Sampler,
    NormalMatrix,
}

impl Semantic {
    pub const ALL: [Semantic; 8] = [
        Semantic::Camera,
        Semantic::Objects,
        Semantic::Materials,
        Semantic::BaseColorTexture,
        Semantic::NormalTexture,
        Semantic::SpecularTexture,
        Semantic::Sampler,
        Semantic::NormalMatrix,
    ];

    /// Normalised names (lowercase, no underscores) recognised for this slot.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Semantic::Camera => &["camera", "camerauniform", "view", "frameuniforms"],
            Semantic::Objects => &["objects", "objectdata", "instances", "instancedata"],
            Semantic::Materials => &["materials", "materialdata"],
            Semantic::BaseColorTexture => &[
                "basecolortexture",
                "basecolor",
                "albedo",
                "albedotexture",
                "diffuse",
                "texture",
                "gtexture",
                "tex",
            ],
            Semantic::NormalTexture => &["normaltexture", "normalmap", "normals", "texnormal"],
            Semantic::SpecularTexture => {
                &["speculartexture", "specularmap", "specular", "texspecular"]
            }
            Semantic::Sampler => &[
                "sampler",
                "texturesampler",
                "basecolorsampler",
                "albedosampler",
                "linearsampler",
                "samp",
            ],
            Semantic::NormalMatrix => &["normalmatrix", "normalmat"],
        }
    }

    pub fn kind(self) -> SlotKind {
        match self {
            Semantic::Camera | Semantic::NormalMatrix => SlotKind::UniformBuffer,
            Semantic::Objects | Semantic::Materials => SlotKind::StorageBuffer,
            Semantic::BaseColorTexture | Semantic::NormalTexture | Semantic::SpecularTexture => {
                SlotKind::Texture
            }
            Semantic::Sampler => SlotKind::Sampler,
        }
    }

    pub fn from_name(name: &str) -> Option<Semantic> {
        let name = name.strip_prefix("u_").unwrap_or(name);
        let normalised: String = name
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Semantic::ALL
            .iter()
            .copied()
            .find(|semantic| semantic.aliases().contains(&normalised.as_str()))
    }
}

/// A registered external program.
#[derive(Debug)]
pub struct ExternalProgram {
    id: ProgramId,
    source: String,
    slots: SlotTable,
}

impl ExternalProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }
}

/// Registry of external programs and the currently active one.
#[derive(Debug, Default)]
pub struct ShaderPack {
    programs: HashMap<ProgramId, ExternalProgram>,
    active: Option<ProgramId>,
    reflections: usize,
}

impl ShaderPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflects `source` the first time `id` is seen; later calls return the
    /// cached table without parsing again.
    pub fn register(&mut self, id: ProgramId, source: &str) -> Result<&SlotTable, ShaderPackError> {
        if !self.programs.contains_key(&id) {
            let slots = reflect_program(id, source).inspect_err(|err| {
                log::error!("{}", err);
            })?;
            self.reflections += 1;
            Self::report(id, &slots);
            self.programs.insert(
                id,
                ExternalProgram {
                    id,
                    source: source.to_owned(),
                    slots,
                },
            );
        }
        self.programs
            .get(&id)
            .map(ExternalProgram::slots)
            .ok_or(ShaderPackError::UnknownProgram(id))
    }

    fn report(id: ProgramId, slots: &SlotTable) {
        log::info!(
            "Reflected external {}: {} bindings",
            id,
            slots.bindings().len()
        );
        for semantic in slots.missing() {
            log::warn!("{} has no {:?} slot; that upload is skipped", id, semantic);
        }
        for binding in slots.unresolved() {
            log::warn!(
                "{} declares unroutable binding {:?} at group {} binding {}",
                id,
                binding.name,
                binding.location.group,
                binding.location.binding
            );
        }
        if !slots.has_mesh_entry_points() {
            log::warn!("{} lacks vs_main/fs_main entry points", id);
        }
    }

    /// Selects the program used for subsequent flushes; `None` restores the
    /// built-in shader.
    pub fn activate(&mut self, id: Option<ProgramId>) -> Result<(), ShaderPackError> {
        if let Some(id) = id {
            if !self.programs.contains_key(&id) {
                return Err(ShaderPackError::UnknownProgram(id));
            }
        }
        if self.active != id {
            log::debug!("Active external program: {:?}", id);
        }
        self.active = id;
        Ok(())
    }

    pub fn active(&self) -> Option<&ExternalProgram> {
        self.active.and_then(|id| self.programs.get(&id))
    }

    pub fn program(&self, id: ProgramId) -> Option<&ExternalProgram> {
        self.programs.get(&id)
    }

    pub fn unregister(&mut self, id: ProgramId) -> bool {
        if self.active == Some(id) {
            self.active = None;
        }
        self.programs.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Number of times a program source was actually parsed.
    pub fn reflection_count(&self) -> usize {
        self.reflections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SOURCE: &str = r#"
@group(0) @binding(0) var<uniform> camera: mat4x4<f32>;
@vertex fn vs_main(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera * vec4<f32>(p, 1.0);
}
@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
"#;

    #[rstest]
    #[case("camera", Some(Semantic::Camera))]
    #[case("u_camera", Some(Semantic::Camera))]
    #[case("NormalMatrix", Some(Semantic::NormalMatrix))]
    #[case("u_normal_matrix", Some(Semantic::NormalMatrix))]
    #[case("normalMap", Some(Semantic::NormalTexture))]
    #[case("gtexture", Some(Semantic::BaseColorTexture))]
    #[case("specular_map", Some(Semantic::SpecularTexture))]
    #[case("shadow_map", None)]
    fn semantic_names(#[case] name: &str, #[case] expected: Option<Semantic>) {
        assert_eq!(Semantic::from_name(name), expected);
    }

    #[test]
    fn programs_are_reflected_once_per_id() {
        let mut pack = ShaderPack::new();
        pack.register(ProgramId(7), SOURCE).unwrap();
        pack.register(ProgramId(7), SOURCE).unwrap();
        assert_eq!(pack.reflection_count(), 1);

        pack.register(ProgramId(8), SOURCE).unwrap();
        assert_eq!(pack.reflection_count(), 2);
        assert_eq!(pack.len(), 2);
    }

    #[test]
    fn activation_requires_registration() {
        let mut pack = ShaderPack::new();
        assert_eq!(
            pack.activate(Some(ProgramId(1))),
            Err(ShaderPackError::UnknownProgram(ProgramId(1)))
        );
        pack.register(ProgramId(1), SOURCE).unwrap();
        pack.activate(Some(ProgramId(1))).unwrap();
        assert_eq!(pack.active().map(ExternalProgram::id), Some(ProgramId(1)));

        assert!(pack.unregister(ProgramId(1)));
        assert!(pack.active().is_none());
    }

    #[test]
    fn failed_parse_is_not_cached() {
        let mut pack = ShaderPack::new();
        assert!(pack.register(ProgramId(3), "fn (").is_err());
        assert!(pack.is_empty());
        assert!(pack.register(ProgramId(3), SOURCE).is_ok());
    }
}
