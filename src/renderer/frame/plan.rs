use std::ops::Range;

use glam::{Mat3, Mat4, Vec3};

use super::batch::{sort_back_to_front, sort_for_batching, InstanceBatcher, InstancedDraw};
use super::store::{FrameCommandStore, GeometryRef};
use super::{FrameError, FramePhase, FrameSequencer, FrameStats};
use crate::renderer::material::{Material, RenderType};
use crate::settings::BatchingSettings;

/// Device-independent half of a frame: records entries, enforces phase
/// order, sorts buckets and produces the draw plan each pass encodes.
pub struct FramePlanner {
    store: FrameCommandStore,
    batcher: InstanceBatcher,
    sequencer: FrameSequencer,
    stats: FrameStats,
    opaque: Range<usize>,
    translucent: Range<usize>,
}

impl FramePlanner {
    pub fn new(settings: &BatchingSettings) -> Self {
        Self {
            store: FrameCommandStore::new(settings.initial_entry_capacity as usize),
            batcher: InstanceBatcher::new(settings.max_instances_per_draw),
            sequencer: FrameSequencer::new(),
            stats: FrameStats::default(),
            opaque: 0..0,
            translucent: 0..0,
        }
    }

    /// Rewinds everything recorded last frame. Capacity is kept.
    pub fn begin_frame(&mut self) {
        self.store.reset();
        self.batcher.clear();
        self.sequencer.reset();
        self.stats = FrameStats::default();
        self.opaque = 0..0;
        self.translucent = 0..0;
    }

    /// Appends one draw entry. Out-of-order calls are logged and dropped.
    pub fn record(
        &mut self,
        geometry: GeometryRef,
        material: &Material,
        model: Mat4,
        normal: Mat3,
        packed_light: u32,
        overlay: u32,
    ) {
        if let Err(err) = self.sequencer.check_record() {
            log::error!("{}", err);
            return;
        }
        self.store
            .record(geometry, material, model, normal, packed_light, overlay);
    }

    /// Counts a draw the host wanted but could not record this frame.
    pub fn skip(&mut self) {
        self.stats.skipped_draws += 1;
    }

    /// Sorts the opaque and cutout buckets and folds them into instanced
    /// draws. A second call in the same frame does nothing.
    pub fn sort(&mut self) -> Result<(), FrameError> {
        if !self.sequencer.begin_sort()? {
            return Ok(());
        }

        sort_for_batching(&mut self.store, RenderType::Opaque);
        sort_for_batching(&mut self.store, RenderType::Cutout);

        let opaque = self.batcher.batch_runs(&self.store, RenderType::Opaque);
        let cutout = self.batcher.batch_runs(&self.store, RenderType::Cutout);
        self.opaque = opaque.start..cutout.end;

        self.stats.entries = self.store.len() as u32;
        self.stats.opaque_entries = self.store.bucket(RenderType::Opaque).len() as u32;
        self.stats.cutout_entries = self.store.bucket(RenderType::Cutout).len() as u32;
        self.stats.translucent_entries = self.store.bucket(RenderType::Translucent).len() as u32;
        self.stats.materials = self.store.materials().len() as u32;
        self.stats.instanced_draws = self.batcher.draws()[self.opaque.clone()]
            .iter()
            .filter(|draw| draw.instance_count > 1)
            .count() as u32;
        Ok(())
    }

    /// Draws of the opaque pass: opaque runs first, then cutout runs.
    pub fn plan_opaque(&mut self) -> Result<Range<usize>, FrameError> {
        self.sequencer.begin_opaque()?;
        Ok(self.opaque.clone())
    }

    /// Sorts the translucent bucket back to front from `camera_pos` and
    /// returns one single-instance draw per entry.
    pub fn plan_translucent(&mut self, camera_pos: Vec3) -> Result<Range<usize>, FrameError> {
        self.sequencer.begin_translucent()?;
        sort_back_to_front(&mut self.store, RenderType::Translucent, camera_pos);
        self.translucent = self
            .batcher
            .batch_ordered(&self.store, RenderType::Translucent);
        Ok(self.translucent.clone())
    }

    pub fn draws(&self, range: Range<usize>) -> &[InstancedDraw] {
        &self.batcher.draws()[range]
    }

    /// Store rows in upload order for the draws in `range`.
    pub fn instances_of(&self, range: Range<usize>) -> &[u32] {
        let draws = &self.batcher.draws()[range];
        match (draws.first(), draws.last()) {
            (Some(first), Some(last)) => {
                let start = first.first_instance as usize;
                let end = (last.first_instance + last.instance_count) as usize;
                &self.batcher.instances()[start..end]
            }
            _ => &[],
        }
    }

    pub fn store(&self) -> &FrameCommandStore {
        &self.store
    }

    pub fn batcher(&self) -> &InstanceBatcher {
        &self.batcher
    }

    pub fn phase(&self) -> FramePhase {
        self.sequencer.phase()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }
}
