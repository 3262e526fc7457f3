use std::collections::HashMap;

use glam::{Mat3, Mat4, Vec3};

use crate::renderer::arena::{GeometryAllocation, Segment, VertexLayoutId};
use crate::renderer::material::{Material, RenderType};

/// Where a draw reads its vertices and indices from.
///
/// `first`/`count` address indices when `indices` is non-empty and vertices
/// otherwise. Vertex and index halves may live in different arenas (skinned
/// results draw with the source mesh's indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryRef {
    pub vertex_arena: VertexLayoutId,
    pub vertices: Segment,
    pub index_arena: VertexLayoutId,
    pub indices: Segment,
    pub first: u32,
    pub count: u32,
}

impl GeometryRef {
    /// Draws every index of `allocation`, or every vertex when it has none.
    pub fn whole(allocation: GeometryAllocation) -> Self {
        let count = if allocation.indices.is_empty() {
            allocation.vertex_count()
        } else {
            (allocation.indices.size / std::mem::size_of::<u32>() as u64) as u32
        };
        Self::sub_range(allocation, 0, count)
    }

    pub fn sub_range(allocation: GeometryAllocation, first: u32, count: u32) -> Self {
        Self {
            vertex_arena: allocation.layout,
            vertices: allocation.vertices,
            index_arena: allocation.layout,
            indices: allocation.indices,
            first,
            count,
        }
    }

    /// Same index range, vertices taken from another allocation.
    pub fn with_vertices(self, allocation: GeometryAllocation) -> Self {
        Self {
            vertex_arena: allocation.layout,
            vertices: allocation.vertices,
            ..self
        }
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }
}

/// Copy of one recorded row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawEntry {
    pub geometry: GeometryRef,
    pub material: u32,
    pub model: Mat4,
    pub normal: Mat3,
    pub packed_light: u32,
    pub overlay: u32,
}

/// Per-frame draw requests stored column-wise.
///
/// Each row is one draw entry; buckets hold row indices partitioned by the
/// material's render type. Materials are deduplicated per frame and entries
/// refer to them by index. `reset` keeps every allocation.
pub struct FrameCommandStore {
    geometry: Vec<GeometryRef>,
    material: Vec<u32>,
    model: Vec<Mat4>,
    normal: Vec<Mat3>,
    light: Vec<u32>,
    overlay: Vec<u32>,
    materials: Vec<Material>,
    material_lookup: HashMap<Material, u32>,
    buckets: [Vec<u32>; 3],
}

impl FrameCommandStore {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            geometry: Vec::with_capacity(capacity),
            material: Vec::with_capacity(capacity),
            model: Vec::with_capacity(capacity),
            normal: Vec::with_capacity(capacity),
            light: Vec::with_capacity(capacity),
            overlay: Vec::with_capacity(capacity),
            materials: Vec::new(),
            material_lookup: HashMap::new(),
            buckets: [
                Vec::with_capacity(capacity),
                Vec::with_capacity(capacity),
                Vec::with_capacity(capacity),
            ],
        }
    }

    pub fn reset(&mut self) {
        self.geometry.clear();
        self.material.clear();
        self.model.clear();
        self.normal.clear();
        self.light.clear();
        self.overlay.clear();
        self.materials.clear();
        self.material_lookup.clear();
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Appends one entry and files it under its material's render type.
    /// Returns the row index.
    pub fn record(
        &mut self,
        geometry: GeometryRef,
        material: &Material,
        model: Mat4,
        normal: Mat3,
        packed_light: u32,
        overlay: u32,
    ) -> u32 {
        let index = self.geometry.len() as u32;
        if self.geometry.len() == self.geometry.capacity() {
            self.grow();
        }

        let material_index = match self.material_lookup.get(material) {
            Some(&existing) => existing,
            None => {
                let next = self.materials.len() as u32;
                self.materials.push(*material);
                self.material_lookup.insert(*material, next);
                next
            }
        };

        self.geometry.push(geometry);
        self.material.push(material_index);
        self.model.push(model);
        self.normal.push(normal);
        self.light.push(packed_light);
        self.overlay.push(overlay);
        self.buckets[material.render_type.bucket_index()].push(index);
        index
    }

    fn grow(&mut self) {
        let old = self.geometry.capacity();
        let additional = old.max(1);
        log::debug!(
            "Growing frame command store: {} -> {}",
            old,
            old + additional
        );
        self.geometry.reserve_exact(additional);
        self.material.reserve_exact(additional);
        self.model.reserve_exact(additional);
        self.normal.reserve_exact(additional);
        self.light.reserve_exact(additional);
        self.overlay.reserve_exact(additional);
    }

    pub fn len(&self) -> usize {
        self.geometry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.geometry.capacity()
    }

    pub fn bucket(&self, render_type: RenderType) -> &[u32] {
        &self.buckets[render_type.bucket_index()]
    }

    pub(crate) fn bucket_mut(&mut self, render_type: RenderType) -> &mut Vec<u32> {
        &mut self.buckets[render_type.bucket_index()]
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn material(&self, index: u32) -> Option<&Material> {
        self.materials.get(index as usize)
    }

    pub fn geometry(&self, entry: u32) -> GeometryRef {
        self.geometry[entry as usize]
    }

    pub fn material_index(&self, entry: u32) -> u32 {
        self.material[entry as usize]
    }

    pub fn model(&self, entry: u32) -> &Mat4 {
        &self.model[entry as usize]
    }

    pub fn normal(&self, entry: u32) -> &Mat3 {
        &self.normal[entry as usize]
    }

    pub fn packed_light(&self, entry: u32) -> u32 {
        self.light[entry as usize]
    }

    pub fn overlay(&self, entry: u32) -> u32 {
        self.overlay[entry as usize]
    }

    /// World-space translation, columns 12-14 of the model matrix.
    pub fn translation(&self, entry: u32) -> Vec3 {
        self.model[entry as usize].w_axis.truncate()
    }

    pub fn entry(&self, entry: u32) -> DrawEntry {
        let i = entry as usize;
        DrawEntry {
            geometry: self.geometry[i],
            material: self.material[i],
            model: self.model[i],
            normal: self.normal[i],
            packed_light: self.light[i],
            overlay: self.overlay[i],
        }
    }
}

impl Default for FrameCommandStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(offset: u64) -> GeometryRef {
        GeometryRef::whole(GeometryAllocation {
            layout: VertexLayoutId::Static,
            vertices: Segment {
                offset,
                size: 96,
                generation: 1,
            },
            indices: Segment::EMPTY,
        })
    }

    #[test]
    fn whole_geometry_counts_vertices_without_indices() {
        let geo = geometry(0);
        assert!(!geo.is_indexed());
        assert_eq!(geo.count, 3);
    }

    #[test]
    fn materials_are_deduplicated() {
        let mut store = FrameCommandStore::new(4);
        let red = Material::opaque([255, 0, 0, 255]);
        let blue = Material::opaque([0, 0, 255, 255]);
        for material in [red, blue, red, red] {
            store.record(geometry(0), &material, Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
        }
        assert_eq!(store.materials().len(), 2);
        assert_eq!(store.material_index(0), store.material_index(2));
        assert_ne!(store.material_index(0), store.material_index(1));
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut store = FrameCommandStore::new(2);
        for _ in 0..10 {
            store.record(geometry(0), &Material::white(), Mat4::IDENTITY, Mat3::IDENTITY, 0, 0);
        }
        let capacity = store.capacity();
        assert!(capacity >= 10);

        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.capacity(), capacity);
        assert!(store.materials().is_empty());
        assert!(RenderType::ALL.iter().all(|&ty| store.bucket(ty).is_empty()));
    }

    #[test]
    fn translation_reads_last_column() {
        let mut store = FrameCommandStore::new(1);
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let entry = store.record(geometry(0), &Material::white(), model, Mat3::IDENTITY, 7, 9);
        assert_eq!(store.translation(entry), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(store.entry(entry).packed_light, 7);
        assert_eq!(store.entry(entry).overlay, 9);
    }
}
