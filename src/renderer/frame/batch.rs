use std::ops::Range;

use glam::Vec3;

use super::store::{FrameCommandStore, GeometryRef};
use crate::renderer::material::RenderType;

/// One draw call: `instance_count` copies of `geometry`, reading per-instance
/// data from `instances[first_instance..]` of the batch plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancedDraw {
    pub geometry: GeometryRef,
    pub material: u32,
    pub render_type: RenderType,
    pub first_instance: u32,
    pub instance_count: u32,
}

impl InstancedDraw {
    pub fn instance_range(&self) -> Range<u32> {
        self.first_instance..self.first_instance + self.instance_count
    }
}

/// Lexicographic key for opaque and cutout buckets: material, then vertex
/// buffer and sub-range, then index buffer and sub-range.
fn batch_key(store: &FrameCommandStore, entry: u32) -> (u32, GeometryRef) {
    (store.material_index(entry), store.geometry(entry))
}

/// Sorts one opaque/cutout bucket so identical draws are contiguous.
pub fn sort_for_batching(store: &mut FrameCommandStore, render_type: RenderType) {
    let mut bucket = std::mem::take(store.bucket_mut(render_type));
    bucket.sort_unstable_by(|&a, &b| batch_key(store, a).cmp(&batch_key(store, b)).then(a.cmp(&b)));
    *store.bucket_mut(render_type) = bucket;
}

/// Stable back-to-front sort by squared distance to `camera_pos`. Equal
/// distances keep recording order.
pub fn sort_back_to_front(store: &mut FrameCommandStore, render_type: RenderType, camera_pos: Vec3) {
    let mut bucket = std::mem::take(store.bucket_mut(render_type));
    bucket.sort_by(|&a, &b| {
        let da = (store.translation(a) - camera_pos).length_squared();
        let db = (store.translation(b) - camera_pos).length_squared();
        db.total_cmp(&da)
    });
    *store.bucket_mut(render_type) = bucket;
}

/// Turns sorted buckets into instanced draws.
///
/// `instances` lists store rows in the order their per-instance data is
/// uploaded; every draw covers a contiguous slice of it. The plan is rebuilt
/// each frame without releasing capacity.
pub struct InstanceBatcher {
    max_instances_per_draw: u32,
    draws: Vec<InstancedDraw>,
    instances: Vec<u32>,
}

impl InstanceBatcher {
    pub fn new(max_instances_per_draw: u32) -> Self {
        Self {
            max_instances_per_draw: max_instances_per_draw.max(1),
            draws: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn max_instances_per_draw(&self) -> u32 {
        self.max_instances_per_draw
    }

    pub fn clear(&mut self) {
        self.draws.clear();
        self.instances.clear();
    }

    pub fn draws(&self) -> &[InstancedDraw] {
        &self.draws
    }

    pub fn instances(&self) -> &[u32] {
        &self.instances
    }

    /// Folds runs of identical (material, geometry) entries of a sorted
    /// bucket into instanced draws. Returns the range of draws appended.
    pub fn batch_runs(&mut self, store: &FrameCommandStore, render_type: RenderType) -> Range<usize> {
        let start = self.draws.len();
        let mut current: Option<InstancedDraw> = None;

        for &entry in store.bucket(render_type) {
            let geometry = store.geometry(entry);
            let material = store.material_index(entry);

            if let Some(run) = current.as_mut() {
                if run.geometry == geometry
                    && run.material == material
                    && run.instance_count < self.max_instances_per_draw
                {
                    run.instance_count += 1;
                    self.instances.push(entry);
                    continue;
                }
                self.draws.push(*run);
            }

            current = Some(InstancedDraw {
                geometry,
                material,
                render_type,
                first_instance: self.instances.len() as u32,
                instance_count: 1,
            });
            self.instances.push(entry);
        }

        if let Some(run) = current {
            self.draws.push(run);
        }

        start..self.draws.len()
    }

    /// One single-instance draw per entry, in bucket order.
    pub fn batch_ordered(&mut self, store: &FrameCommandStore, render_type: RenderType) -> Range<usize> {
        let start = self.draws.len();
        for &entry in store.bucket(render_type) {
            self.draws.push(InstancedDraw {
                geometry: store.geometry(entry),
                material: store.material_index(entry),
                render_type,
                first_instance: self.instances.len() as u32,
                instance_count: 1,
            });
            self.instances.push(entry);
        }
        start..self.draws.len()
    }

    /// Store rows covered by `draw`.
    pub fn entries_of(&self, draw: &InstancedDraw) -> &[u32] {
        let range = draw.instance_range();
        &self.instances[range.start as usize..range.end as usize]
    }
}

impl Default for InstanceBatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}
