use std::rc::Rc;

use glam::Mat4;

use super::morph::{ActiveMorphState, MorphAllocation, MorphTarget};
use super::palette::{BonePalette, BonePose};
use super::SkinningError;
use crate::renderer::arena::{ArenaManager, SegmentGuard, VertexLayoutId};
use crate::renderer::frame::GeometryRef;

/// Skinning progress of one instance within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkinningState {
    /// Created, never dispatched; the result segment holds no vertices yet.
    Idle,
    /// Palette and active morphs prepared for upload.
    Uploading,
    /// Compute work encoded.
    Dispatched,
    /// Result segment may be drawn.
    Readable,
}

/// Immutable source data shared by every instance of a skinned model.
#[derive(Debug)]
pub struct SkinnedPrototype {
    source: SegmentGuard,
    vertex_count: u32,
    bone_count: u32,
    morphs: Option<MorphAllocation>,
}

impl SkinnedPrototype {
    pub(crate) fn new(
        source: SegmentGuard,
        vertex_count: u32,
        bone_count: u32,
        morphs: Option<MorphAllocation>,
    ) -> Self {
        Self {
            source,
            vertex_count,
            bone_count,
            morphs,
        }
    }

    pub fn source(&self) -> &SegmentGuard {
        &self.source
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn bone_count(&self) -> u32 {
        self.bone_count
    }

    pub fn morph_targets(&self) -> &[MorphTarget] {
        self.morphs
            .as_ref()
            .map(MorphAllocation::targets)
            .unwrap_or(&[])
    }

    /// Index range of the whole source mesh.
    pub fn geometry(&self) -> GeometryRef {
        GeometryRef::whole(self.source.allocation())
    }
}

/// Independently animated copy of a [`SkinnedPrototype`].
///
/// Owns its result segment, bone palette and morph weights. The result
/// segment is released when the instance is dropped.
#[derive(Debug)]
pub struct SkinnedInstance {
    prototype: Rc<SkinnedPrototype>,
    result: SegmentGuard,
    palette: BonePalette,
    morphs: ActiveMorphState,
    state: SkinningState,
}

impl SkinnedInstance {
    pub fn new(
        prototype: Rc<SkinnedPrototype>,
        arenas: &mut ArenaManager,
        max_bones: u32,
    ) -> Result<Self, SkinningError> {
        if prototype.bone_count() > max_bones {
            let err = SkinningError::TooManyBones {
                count: prototype.bone_count(),
                capacity: max_bones,
            };
            log::error!("{}", err);
            return Err(err);
        }

        let bytes = prototype.vertex_count() as u64 * VertexLayoutId::SkinningResult.stride();
        let result = arenas.allocate_owned(VertexLayoutId::SkinningResult, bytes, 0)?;
        let mut palette = BonePalette::new(max_bones);
        let identity = vec![Mat4::IDENTITY; prototype.bone_count() as usize];
        palette.set_flattened(&identity)?;
        let morphs = ActiveMorphState::new(prototype.morph_targets().len());

        Ok(Self {
            prototype,
            result,
            palette,
            morphs,
            state: SkinningState::Idle,
        })
    }

    /// Another instance of the same prototype with fresh animation state.
    pub fn instantiate(&self, arenas: &mut ArenaManager) -> Result<Self, SkinningError> {
        Self::new(Rc::clone(&self.prototype), arenas, self.palette.capacity())
    }

    pub fn prototype(&self) -> &Rc<SkinnedPrototype> {
        &self.prototype
    }

    pub fn result(&self) -> &SegmentGuard {
        &self.result
    }

    pub fn palette(&self) -> &BonePalette {
        &self.palette
    }

    pub fn morphs(&self) -> &ActiveMorphState {
        &self.morphs
    }

    pub fn state(&self) -> SkinningState {
        self.state
    }

    /// Replaces the palette with already-flattened matrices. The count must
    /// match the prototype's skeleton.
    pub fn set_bone_matrices(&mut self, matrices: &[Mat4]) -> Result<(), SkinningError> {
        self.check_bone_count(matrices.len())?;
        self.palette.set_flattened(matrices)
    }

    pub fn set_bone_hierarchy(&mut self, bones: &[BonePose]) -> Result<(), SkinningError> {
        self.check_bone_count(bones.len())?;
        self.palette.flatten_hierarchy(bones)
    }

    // over-capacity counts are left to the palette so they report TooManyBones
    fn check_bone_count(&self, count: usize) -> Result<(), SkinningError> {
        let expected = self.prototype.bone_count();
        if count > self.palette.capacity() as usize || count == expected as usize {
            return Ok(());
        }
        let err = SkinningError::BoneCountMismatch {
            expected,
            actual: count as u32,
        };
        log::error!("{}", err);
        Err(err)
    }

    pub fn set_weight(&mut self, name: &str, weight: f32) -> Result<(), SkinningError> {
        self.morphs
            .set_weight(self.prototype.morph_targets(), name, weight)
    }

    pub fn set_weight_by_index(&mut self, index: u32, weight: f32) -> Result<(), SkinningError> {
        self.morphs.set_weight_by_index(index, weight)
    }

    pub fn set_weights(&mut self, weights: &[f32]) -> Result<(), SkinningError> {
        self.morphs.set_weights(weights)
    }

    /// Starts a tick: recomputes the active morph set and moves to
    /// `Uploading`.
    pub fn begin_update(&mut self, morph_epsilon: f32) {
        self.morphs
            .refresh(self.prototype.morph_targets(), morph_epsilon);
        self.state = SkinningState::Uploading;
    }

    pub(crate) fn mark_dispatched(&mut self) {
        debug_assert_eq!(self.state, SkinningState::Uploading);
        self.state = SkinningState::Dispatched;
    }

    pub(crate) fn mark_readable(&mut self) {
        if self.state == SkinningState::Dispatched {
            self.state = SkinningState::Readable;
        }
    }

    pub fn is_readable(&self) -> bool {
        self.state == SkinningState::Readable
    }

    /// Draw geometry reading the deformed vertices with the prototype's
    /// indices. Fails until the instance has been dispatched.
    pub fn geometry(&self) -> Result<GeometryRef, SkinningError> {
        if !self.is_readable() {
            return Err(SkinningError::NotReadable(self.state));
        }
        Ok(self.prototype.geometry().with_vertices(self.result.allocation()))
    }
}
