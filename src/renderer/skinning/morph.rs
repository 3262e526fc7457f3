use half::f16;

use super::SkinningError;
use crate::renderer::arena::{ArenaBuffer, BackingFactory, ReleaseQueue, Segment};
use crate::scratch;

/// Maximum number of morph targets applied to one instance per tick.
pub const MAX_ACTIVE_MORPHS: usize = 8;

/// Size of one atlas texel: four half floats (xyz delta, unused w).
pub const MORPH_TEXEL_BYTES: u64 = 8;

/// Texels per vertex per target: position delta, normal delta.
pub const TEXELS_PER_VERTEX: u32 = 2;

/// Per-vertex deltas of one target, as supplied by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphTargetData {
    pub name: String,
    pub position_deltas: Vec<[f32; 3]>,
    pub normal_deltas: Vec<[f32; 3]>,
}

/// Immutable target description shared by all instances of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphTarget {
    pub name: String,
    pub logical_index: u32,
    pub atlas_offset_texels: u32,
}

/// One entry of the active set uploaded to the skinning pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveMorph {
    pub logical_index: u32,
    pub atlas_offset_texels: u32,
    pub weight: f32,
}

/// Ranks `weights` by descending value, ties by ascending index, and writes
/// at most [`MAX_ACTIVE_MORPHS`] indices whose weight exceeds `epsilon`
/// into `out`.
pub fn select_top_k(weights: &[f32], epsilon: f32, out: &mut Vec<(u32, f32)>) {
    out.clear();
    scratch::with_weight_scratch(|candidates| {
        candidates.extend(
            weights
                .iter()
                .enumerate()
                .filter(|&(_, &w)| w > epsilon)
                .map(|(i, &w)| (i as u32, w)),
        );

        let order = |a: &(u32, f32), b: &(u32, f32)| {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };

        if candidates.len() > MAX_ACTIVE_MORPHS {
            candidates.select_nth_unstable_by(MAX_ACTIVE_MORPHS - 1, order);
            candidates.truncate(MAX_ACTIVE_MORPHS);
        }
        candidates.sort_unstable_by(order);
        out.extend_from_slice(candidates);
    });
}

/// Mutable per-instance weights plus the active set derived from them.
#[derive(Debug, Clone)]
pub struct ActiveMorphState {
    weights: Vec<f32>,
    active: Vec<ActiveMorph>,
    selection: Vec<(u32, f32)>,
}

impl ActiveMorphState {
    pub fn new(target_count: usize) -> Self {
        Self {
            weights: vec![0.0; target_count],
            active: Vec::with_capacity(MAX_ACTIVE_MORPHS),
            selection: Vec::with_capacity(MAX_ACTIVE_MORPHS),
        }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn active(&self) -> &[ActiveMorph] {
        &self.active
    }

    pub fn set_weight_by_index(&mut self, index: u32, weight: f32) -> Result<(), SkinningError> {
        let count = self.weights.len() as u32;
        let slot = self
            .weights
            .get_mut(index as usize)
            .ok_or(SkinningError::MorphIndexOutOfRange { index, count })?;
        *slot = weight;
        Ok(())
    }

    pub fn set_weight(
        &mut self,
        targets: &[MorphTarget],
        name: &str,
        weight: f32,
    ) -> Result<(), SkinningError> {
        let target = targets
            .iter()
            .find(|target| target.name == name)
            .ok_or_else(|| SkinningError::UnknownMorphTarget(name.to_owned()))?;
        self.set_weight_by_index(target.logical_index, weight)
    }

    pub fn set_weights(&mut self, weights: &[f32]) -> Result<(), SkinningError> {
        if weights.len() != self.weights.len() {
            return Err(SkinningError::WeightCountMismatch {
                expected: self.weights.len() as u32,
                actual: weights.len() as u32,
            });
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    /// Rebuilds the active set from the current weights. Runs every tick,
    /// whether or not weights changed.
    pub fn refresh(&mut self, targets: &[MorphTarget], epsilon: f32) {
        select_top_k(&self.weights, epsilon, &mut self.selection);
        self.active.clear();
        self.active.extend(self.selection.iter().filter_map(|&(index, weight)| {
            targets.get(index as usize).map(|target| ActiveMorph {
                logical_index: index,
                atlas_offset_texels: target.atlas_offset_texels,
                weight,
            })
        }));
    }
}

/// Packs a delta as one atlas texel: `[xy as f16x2, z as f16 + zero]`.
pub fn pack_texel(delta: [f32; 3]) -> [u32; 2] {
    let bits = |v: f32| f16::from_f32(v).to_bits() as u32;
    [
        bits(delta[0]) | (bits(delta[1]) << 16),
        bits(delta[2]),
    ]
}

pub fn unpack_texel(texel: [u32; 2]) -> [f32; 3] {
    let value = |bits: u32| f16::from_bits((bits & 0xFFFF) as u16).to_f32();
    [value(texel[0]), value(texel[0] >> 16), value(texel[1])]
}

/// Morph deltas of one prototype placed in the atlas. Dropping it queues the
/// atlas range for release.
#[derive(Debug)]
pub struct MorphAllocation {
    segment: Segment,
    targets: Vec<MorphTarget>,
    queue: ReleaseQueue<Segment>,
}

impl MorphAllocation {
    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn targets(&self) -> &[MorphTarget] {
        &self.targets
    }
}

impl Drop for MorphAllocation {
    fn drop(&mut self) {
        if !self.segment.is_empty() {
            self.queue.push(self.segment);
        }
    }
}

/// Shared half-float storage for every prototype's morph deltas.
///
/// Targets of one prototype are laid out back to back, each holding
/// [`TEXELS_PER_VERTEX`] texels per vertex. Every reservation is a multiple
/// of the texel size, so texel offsets are exact.
pub struct MorphAtlas {
    buffer: ArenaBuffer,
    releases: ReleaseQueue<Segment>,
    epoch: u64,
}

impl MorphAtlas {
    pub fn new(factory: &dyn BackingFactory, initial_bytes: u64, ceiling: u64) -> Self {
        Self {
            buffer: ArenaBuffer::new(
                factory,
                "MorphAtlas",
                wgpu::BufferUsages::STORAGE,
                initial_bytes.max(MORPH_TEXEL_BYTES),
                ceiling,
            ),
            releases: ReleaseQueue::new(),
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn buffer(&self) -> &ArenaBuffer {
        &self.buffer
    }

    pub fn used_bytes(&self) -> u64 {
        self.buffer.allocator().used_bytes()
    }

    /// Validates, packs and uploads `targets` for a mesh of `vertex_count`
    /// vertices.
    pub fn upload(
        &mut self,
        vertex_count: u32,
        targets: &[MorphTargetData],
    ) -> Result<MorphAllocation, SkinningError> {
        self.collect_released();

        for target in targets {
            for len in [target.position_deltas.len(), target.normal_deltas.len()] {
                if len != vertex_count as usize {
                    return Err(SkinningError::MorphVertexMismatch {
                        target: target.name.clone(),
                        expected: vertex_count,
                        actual: len as u32,
                    });
                }
            }
        }

        let texels_per_target = vertex_count as u64 * TEXELS_PER_VERTEX as u64;
        let bytes = texels_per_target * targets.len() as u64 * MORPH_TEXEL_BYTES;
        let (segment, grew) = self.buffer.allocate(bytes)?;
        if grew {
            self.epoch += 1;
        }

        let base_texel = segment.offset / MORPH_TEXEL_BYTES;
        let mut packed: Vec<[u32; 2]> = Vec::with_capacity((bytes / MORPH_TEXEL_BYTES) as usize);
        let mut described = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            described.push(MorphTarget {
                name: target.name.clone(),
                logical_index: index as u32,
                atlas_offset_texels: (base_texel + index as u64 * texels_per_target) as u32,
            });
            for (position, normal) in target.position_deltas.iter().zip(&target.normal_deltas) {
                packed.push(pack_texel(*position));
                packed.push(pack_texel(*normal));
            }
        }

        if let Err(err) = self
            .buffer
            .write(segment, 0, bytemuck::cast_slice(&packed))
        {
            let _ = self.buffer.free(segment);
            return Err(err.into());
        }

        Ok(MorphAllocation {
            segment,
            targets: described,
            queue: self.releases.clone(),
        })
    }

    pub fn collect_released(&mut self) -> usize {
        let pending = self.releases.drain();
        let count = pending.len();
        for segment in pending {
            if let Err(err) = self.buffer.free(segment) {
                log::error!("Deferred morph release failed: {}", err);
            }
        }
        count
    }

    pub fn live_allocations(&self) -> usize {
        self.buffer.allocator().live_count()
    }
}
