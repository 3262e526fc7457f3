//! GPU skinning and morph-target blending.
//!
//! A [`SkinnedPrototype`] holds the bind-pose vertices (in the skinned-source
//! arena) and morph deltas (in the [`MorphAtlas`]). Each [`SkinnedInstance`]
//! owns a result segment that a compute pass fills every tick from the
//! prototype, the instance's bone palette and its top-K morph weights. The
//! result is drawn like any static mesh.

pub mod instance;
pub mod morph;
pub mod palette;
pub mod pipeline;

use std::rc::Rc;

use thiserror::Error;

use crate::renderer::arena::{ArenaError, ArenaManager, BackingFactory, VertexLayoutId};
use crate::renderer::vertex::SkinnedVertex;
use crate::settings::SkinningSettings;

pub use instance::{SkinnedInstance, SkinnedPrototype, SkinningState};
pub use morph::{
    select_top_k, ActiveMorph, ActiveMorphState, MorphAllocation, MorphAtlas, MorphTarget,
    MorphTargetData, MAX_ACTIVE_MORPHS,
};
pub use palette::{BonePalette, BonePose};
pub use pipeline::{ComputeSkinner, SkinningParams};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkinningError {
    #[error("{count} bones exceed the palette capacity of {capacity}")]
    TooManyBones { count: u32, capacity: u32 },
    #[error("skeleton has {expected} bones but {actual} were supplied")]
    BoneCountMismatch { expected: u32, actual: u32 },
    #[error("bone {bone} references parent {parent}, which does not precede it")]
    InvalidParent { bone: u32, parent: u32 },
    #[error("unknown morph target {0:?}")]
    UnknownMorphTarget(String),
    #[error("morph index {index} out of range for {count} targets")]
    MorphIndexOutOfRange { index: u32, count: u32 },
    #[error("expected {expected} morph weights, got {actual}")]
    WeightCountMismatch { expected: u32, actual: u32 },
    #[error("morph target {target:?} has {actual} deltas for {expected} vertices")]
    MorphVertexMismatch {
        target: String,
        expected: u32,
        actual: u32,
    },
    #[error("joint index {joint} is outside the {bone_count} bones of the skeleton")]
    JointOutOfRange { joint: u32, bone_count: u32 },
    #[error("skinned result is not readable while {0:?}")]
    NotReadable(SkinningState),
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// Owner of the morph atlas and, when a device is available, the compute
/// pipeline that deforms skinned instances.
pub struct SkinningSystem {
    settings: SkinningSettings,
    atlas: MorphAtlas,
    skinner: Option<ComputeSkinner>,
}

impl SkinningSystem {
    pub fn new(
        settings: SkinningSettings,
        factory: &dyn BackingFactory,
        atlas_initial_bytes: u64,
        atlas_ceiling: u64,
        skinner: Option<ComputeSkinner>,
    ) -> Self {
        Self {
            settings,
            atlas: MorphAtlas::new(factory, atlas_initial_bytes, atlas_ceiling),
            skinner,
        }
    }

    pub fn settings(&self) -> &SkinningSettings {
        &self.settings
    }

    pub fn atlas(&self) -> &MorphAtlas {
        &self.atlas
    }

    pub fn has_compute(&self) -> bool {
        self.skinner.is_some()
    }

    /// Uploads bind-pose vertices, indices and morph deltas once; the result
    /// is shared by every instance.
    pub fn create_prototype(
        &mut self,
        arenas: &mut ArenaManager,
        vertices: &[SkinnedVertex],
        indices: &[u32],
        bone_count: u32,
        morph_targets: &[MorphTargetData],
    ) -> Result<Rc<SkinnedPrototype>, SkinningError> {
        if bone_count > self.settings.max_bones {
            let err = SkinningError::TooManyBones {
                count: bone_count,
                capacity: self.settings.max_bones,
            };
            log::error!("{}", err);
            return Err(err);
        }
        if let Some(joint) = vertices
            .iter()
            .flat_map(|vertex| vertex.joints.iter().zip(vertex.weights.iter()))
            .filter(|(_, &weight)| weight != 0.0)
            .map(|(&joint, _)| joint)
            .find(|&joint| joint >= bone_count)
        {
            return Err(SkinningError::JointOutOfRange { joint, bone_count });
        }

        let morphs = if morph_targets.is_empty() {
            None
        } else {
            Some(self.atlas.upload(vertices.len() as u32, morph_targets)?)
        };

        let source = arenas.upload(
            VertexLayoutId::SkinnedSource,
            bytemuck::cast_slice(vertices),
            bytemuck::cast_slice(indices),
        )?;

        log::debug!(
            "Created skinned prototype: {} vertices, {} bones, {} morph targets",
            vertices.len(),
            bone_count,
            morph_targets.len()
        );

        Ok(Rc::new(SkinnedPrototype::new(
            source,
            vertices.len() as u32,
            bone_count,
            morphs,
        )))
    }

    pub fn create_instance(
        &self,
        arenas: &mut ArenaManager,
        prototype: &Rc<SkinnedPrototype>,
    ) -> Result<SkinnedInstance, SkinningError> {
        SkinnedInstance::new(Rc::clone(prototype), arenas, self.settings.max_bones)
    }

    /// Prepares `instance` for this tick's dispatch.
    pub fn update(&self, instance: &mut SkinnedInstance) {
        instance.begin_update(self.settings.morph_weight_epsilon);
    }

    /// Encodes skinning for every instance in `Uploading` state and returns
    /// how many were dispatched. Without a compute pipeline, or while a
    /// required buffer is missing, nothing is dispatched and instances stay
    /// unreadable.
    pub fn dispatch<'a>(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        arenas: &ArenaManager,
        instances: impl IntoIterator<Item = &'a mut SkinnedInstance>,
    ) -> u32 {
        let Some(skinner) = self.skinner.as_mut() else {
            log::warn!("Skipping skinning dispatch: no compute pipeline");
            return 0;
        };
        skinner.dispatch(encoder, arenas, &self.atlas, instances)
    }

    pub fn collect_released(&mut self) -> usize {
        self.atlas.collect_released()
    }

    pub fn live_morph_allocations(&self) -> usize {
        self.atlas.live_allocations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::arena::HostBackingFactory;
    use crate::renderer::vertex::{v, SkinnedVertex};
    use crate::settings::ArenaSettings;

    fn system() -> SkinningSystem {
        SkinningSystem::new(
            SkinningSettings::default(),
            &HostBackingFactory,
            1024,
            1 << 20,
            None,
        )
    }

    fn triangle() -> Vec<SkinnedVertex> {
        vec![
            SkinnedVertex::rigid(v([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]), 0),
            SkinnedVertex::rigid(v([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]), 0),
            SkinnedVertex::rigid(v([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]), 1),
        ]
    }

    #[test]
    fn prototype_uploads_source_and_morphs() {
        let mut arenas = ArenaManager::headless(ArenaSettings::default());
        let mut skinning = system();
        let morph = MorphTargetData {
            name: "raise".into(),
            position_deltas: vec![[0.0, 1.0, 0.0]; 3],
            normal_deltas: vec![[0.0; 3]; 3],
        };
        let proto = skinning
            .create_prototype(&mut arenas, &triangle(), &[0, 1, 2], 2, &[morph])
            .unwrap();

        assert_eq!(proto.vertex_count(), 3);
        assert_eq!(proto.morph_targets().len(), 1);
        assert_eq!(proto.geometry().count, 3);
        assert_eq!(skinning.live_morph_allocations(), 1);
    }

    #[test]
    fn joints_outside_skeleton_are_rejected() {
        let mut arenas = ArenaManager::headless(ArenaSettings::default());
        let mut skinning = system();
        let err = skinning
            .create_prototype(&mut arenas, &triangle(), &[0, 1, 2], 1, &[])
            .unwrap_err();
        assert_eq!(
            err,
            SkinningError::JointOutOfRange {
                joint: 1,
                bone_count: 1
            }
        );
        assert_eq!(arenas.live_allocations(), 0);
    }

    #[test]
    fn dispatch_without_compute_leaves_instances_unreadable() {
        let mut arenas = ArenaManager::headless(ArenaSettings::default());
        let mut skinning = system();
        let proto = skinning
            .create_prototype(&mut arenas, &triangle(), &[0, 1, 2], 2, &[])
            .unwrap();
        let mut instance = skinning.create_instance(&mut arenas, &proto).unwrap();
        skinning.update(&mut instance);
        assert_eq!(instance.state(), SkinningState::Uploading);
        assert!(!skinning.has_compute());
        assert!(instance.geometry().is_err());
    }
}
