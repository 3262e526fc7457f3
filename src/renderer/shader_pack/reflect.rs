use std::collections::HashMap;

use super::{ProgramId, Semantic, ShaderPackError};

/// Resource class of one binding, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    UniformBuffer,
    StorageBuffer,
    Texture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotLocation {
    pub group: u32,
    pub binding: u32,
}

/// One `@group/@binding` global declared by an external program.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedBinding {
    pub name: String,
    pub location: SlotLocation,
    /// `None` when the resource type is something the engine cannot supply.
    pub kind: Option<SlotKind>,
    /// Meaning recognised from the name; `None` if unknown or the kind does
    /// not match what the semantic needs.
    pub semantic: Option<Semantic>,
}

impl ReflectedBinding {
    pub fn is_routable(&self) -> bool {
        self.semantic.is_some()
    }
}

/// Where an external program expects each engine resource, or that it does
/// not expect it at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotTable {
    bindings: Vec<ReflectedBinding>,
    slots: HashMap<Semantic, SlotLocation>,
    mesh_entry_points: bool,
}

impl SlotTable {
    pub fn slot(&self, semantic: Semantic) -> Option<SlotLocation> {
        self.slots.get(&semantic).copied()
    }

    pub fn has(&self, semantic: Semantic) -> bool {
        self.slots.contains_key(&semantic)
    }

    /// Bindings sorted by group, then binding.
    pub fn bindings(&self) -> &[ReflectedBinding] {
        &self.bindings
    }

    pub fn group_bindings(&self, group: u32) -> impl Iterator<Item = &ReflectedBinding> + '_ {
        self.bindings
            .iter()
            .filter(move |binding| binding.location.group == group)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ReflectedBinding> + '_ {
        self.bindings.iter().filter(|binding| !binding.is_routable())
    }

    /// Every declared binding can be fed and `vs_main`/`fs_main` exist.
    pub fn is_complete(&self) -> bool {
        self.mesh_entry_points && self.unresolved().next().is_none()
    }

    pub fn has_mesh_entry_points(&self) -> bool {
        self.mesh_entry_points
    }

    /// Highest group index used, if any binding exists.
    pub fn max_group(&self) -> Option<u32> {
        self.bindings.iter().map(|binding| binding.location.group).max()
    }

    /// A per-draw normal matrix uniform forces one draw per instance.
    pub fn splits_instances(&self) -> bool {
        self.has(Semantic::NormalMatrix)
    }

    pub fn missing(&self) -> impl Iterator<Item = Semantic> + '_ {
        Semantic::ALL
            .iter()
            .copied()
            .filter(|semantic| !self.has(*semantic))
    }
}

/// Parses WGSL and maps its resource globals to engine semantics.
pub fn reflect_program(id: ProgramId, source: &str) -> Result<SlotTable, ShaderPackError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| ShaderPackError::Parse {
        id,
        message: err.emit_to_string(source),
    })?;

    let mut bindings: Vec<ReflectedBinding> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            let name = var.name.clone().unwrap_or_default();
            let kind = classify(&module, var);
            let semantic = Semantic::from_name(&name)
                .filter(|semantic| Some(semantic.kind()) == kind);
            Some(ReflectedBinding {
                name,
                location: SlotLocation {
                    group: binding.group,
                    binding: binding.binding,
                },
                kind,
                semantic,
            })
        })
        .collect();
    bindings.sort_by_key(|binding| binding.location);

    let mut slots = HashMap::new();
    for binding in &bindings {
        if let Some(semantic) = binding.semantic {
            slots.entry(semantic).or_insert(binding.location);
        }
    }

    let has_entry = |name: &str, stage: naga::ShaderStage| {
        module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
    };
    let mesh_entry_points =
        has_entry("vs_main", naga::ShaderStage::Vertex) && has_entry("fs_main", naga::ShaderStage::Fragment);

    Ok(SlotTable {
        bindings,
        slots,
        mesh_entry_points,
    })
}

fn classify(module: &naga::Module, var: &naga::GlobalVariable) -> Option<SlotKind> {
    match var.space {
        naga::AddressSpace::Uniform => Some(SlotKind::UniformBuffer),
        naga::AddressSpace::Storage { access } if !access.contains(naga::StorageAccess::STORE) => {
            Some(SlotKind::StorageBuffer)
        }
        naga::AddressSpace::Handle => match module.types[var.ty].inner {
            naga::TypeInner::Image {
                dim: naga::ImageDimension::D2,
                arrayed: false,
                class:
                    naga::ImageClass::Sampled {
                        kind: naga::ScalarKind::Float,
                        multi: false,
                    },
            } => Some(SlotKind::Texture),
            naga::TypeInner::Sampler { comparison: false } => Some(SlotKind::Sampler),
            _ => None,
        },
        _ => None,
    }
}
