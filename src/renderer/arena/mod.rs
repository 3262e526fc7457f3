//! GPU geometry arenas.
//!
//! One [`GeometryArena`] exists per vertex layout. Each owns a vertex buffer
//! and an index buffer, both carved into [`Segment`]s by a
//! [`RangeAllocator`]. Arenas are created on first use and grow by doubling
//! up to the configured ceiling; growth copies the occupied prefix so live
//! offsets survive.

pub mod backing;
pub mod range;
pub mod segment;

use std::collections::HashMap;

use thiserror::Error;

use crate::renderer::vertex::{SkinnedVertex, Vertex};
use crate::settings::ArenaSettings;

pub use backing::{
    ArenaBacking, BackingFactory, GpuBacking, GpuBackingFactory, HostBacking, HostBackingFactory,
};
pub use range::{align_up, Growth, Placement, RangeAllocator, ARENA_ALIGNMENT};
pub use segment::{GeometryAllocation, ReleaseQueue, Segment, SegmentGuard};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena allocation of {requested} bytes exceeds the {ceiling} byte ceiling")]
    CapacityExceeded { requested: u64, ceiling: u64 },
    #[error("segment at offset {offset} (generation {generation}) is not live")]
    UnknownSegment { offset: u64, generation: u32 },
    #[error("write of {len} bytes at {offset} falls outside its segment")]
    WriteOutOfBounds { offset: u64, len: u64 },
    #[error("no arena exists for layout {0:?}")]
    MissingArena(VertexLayoutId),
    #[error("layout {0:?} has no index buffer")]
    IndicesUnsupported(VertexLayoutId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexLayoutId {
    Static,
    SkinnedSource,
    SkinningResult,
}

impl VertexLayoutId {
    pub const fn stride(self) -> u64 {
        match self {
            VertexLayoutId::Static | VertexLayoutId::SkinningResult => {
                std::mem::size_of::<Vertex>() as u64
            }
            VertexLayoutId::SkinnedSource => std::mem::size_of::<SkinnedVertex>() as u64,
        }
    }

    pub const fn has_indices(self) -> bool {
        !matches!(self, VertexLayoutId::SkinningResult)
    }

    fn vertex_usage(self) -> wgpu::BufferUsages {
        match self {
            VertexLayoutId::Static => wgpu::BufferUsages::VERTEX,
            VertexLayoutId::SkinnedSource => wgpu::BufferUsages::STORAGE,
            VertexLayoutId::SkinningResult => {
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            VertexLayoutId::Static => "StaticArena",
            VertexLayoutId::SkinnedSource => "SkinnedSourceArena",
            VertexLayoutId::SkinningResult => "SkinningResultArena",
        }
    }
}

/// Range allocator paired with the storage it hands out.
pub struct ArenaBuffer {
    allocator: RangeAllocator,
    backing: Box<dyn ArenaBacking>,
    label: String,
}

impl ArenaBuffer {
    pub fn new(
        factory: &dyn BackingFactory,
        label: &str,
        usage: wgpu::BufferUsages,
        initial_capacity: u64,
        ceiling: u64,
    ) -> Self {
        let allocator = RangeAllocator::new(initial_capacity, ceiling);
        let backing = factory.create(label, usage, allocator.capacity());
        log::info!(
            "Created {} with {} bytes (ceiling {} bytes)",
            label,
            allocator.capacity(),
            allocator.ceiling()
        );
        Self {
            allocator,
            backing,
            label: label.to_owned(),
        }
    }

    /// Reserves `size` bytes; returns whether the backing grew.
    pub fn allocate(&mut self, size: u64) -> Result<(Segment, bool), ArenaError> {
        let placement = self.allocator.allocate(size).inspect_err(|err| {
            log::error!("{}: {}", self.label, err);
        })?;

        let grew = if let Some(growth) = placement.growth {
            log::info!(
                "Growing {}: {} -> {}",
                self.label,
                growth.old_capacity,
                growth.new_capacity
            );
            // growth only happens on bump placement, so the old watermark is the segment start
            self.backing.grow(growth, placement.segment.offset);
            true
        } else {
            false
        };

        Ok((placement.segment, grew))
    }

    pub fn free(&mut self, segment: Segment) -> Result<(), ArenaError> {
        self.allocator.free(segment).inspect_err(|err| {
            log::error!("{}: {}", self.label, err);
        })
    }

    pub fn write(&mut self, segment: Segment, offset: u64, bytes: &[u8]) -> Result<(), ArenaError> {
        let len = bytes.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if offset + len > segment.size || !self.allocator.is_live(segment) {
            return Err(ArenaError::WriteOutOfBounds {
                offset: segment.offset + offset,
                len,
            });
        }
        self.backing.write(segment.offset + offset, bytes);
        Ok(())
    }

    pub fn allocator(&self) -> &RangeAllocator {
        &self.allocator
    }

    pub fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        self.backing.gpu_buffer()
    }

    pub fn host_bytes(&self) -> Option<&[u8]> {
        self.backing.host_bytes()
    }
}

pub struct GeometryArena {
    layout: VertexLayoutId,
    vertices: ArenaBuffer,
    indices: Option<ArenaBuffer>,
    epoch: u64,
    // whole allocations with at least one non-empty half
    live: usize,
}

impl GeometryArena {
    fn new(layout: VertexLayoutId, settings: &ArenaSettings, factory: &dyn BackingFactory) -> Self {
        let vertices = ArenaBuffer::new(
            factory,
            &format!("{}.Vertices", layout.label()),
            layout.vertex_usage(),
            settings.initial_vertex_bytes,
            settings.max_bytes,
        );
        let indices = layout.has_indices().then(|| {
            ArenaBuffer::new(
                factory,
                &format!("{}.Indices", layout.label()),
                wgpu::BufferUsages::INDEX,
                settings.initial_index_bytes,
                settings.max_bytes,
            )
        });

        Self {
            layout,
            vertices,
            indices,
            epoch: 0,
            live: 0,
        }
    }

    pub fn layout(&self) -> VertexLayoutId {
        self.layout
    }

    /// Bumped whenever either buffer is replaced by growth.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn vertices(&self) -> &ArenaBuffer {
        &self.vertices
    }

    pub fn indices(&self) -> Option<&ArenaBuffer> {
        self.indices.as_ref()
    }

    fn allocate(
        &mut self,
        vertex_bytes: u64,
        index_bytes: u64,
    ) -> Result<GeometryAllocation, ArenaError> {
        let (vertices, vertex_grew) = self.vertices.allocate(vertex_bytes)?;
        if vertex_grew {
            self.epoch += 1;
        }

        let (indices, index_grew) = match (&mut self.indices, index_bytes) {
            (_, 0) => (Segment::EMPTY, false),
            (Some(buffer), bytes) => match buffer.allocate(bytes) {
                Ok(result) => result,
                Err(err) => {
                    // no partial geometry: hand the vertex range back
                    let _ = self.vertices.free(vertices);
                    return Err(err);
                }
            },
            (None, _) => {
                let _ = self.vertices.free(vertices);
                return Err(ArenaError::IndicesUnsupported(self.layout));
            }
        };

        if index_grew {
            self.epoch += 1;
        }

        let allocation = GeometryAllocation {
            layout: self.layout,
            vertices,
            indices,
        };
        if !allocation.is_empty() {
            self.live += 1;
        }
        Ok(allocation)
    }

    fn free(&mut self, allocation: GeometryAllocation) -> Result<(), ArenaError> {
        let vertex_result = self.vertices.free(allocation.vertices);
        let index_result = match &mut self.indices {
            Some(buffer) => buffer.free(allocation.indices),
            None => Ok(()),
        };
        vertex_result.and(index_result)?;
        if !allocation.is_empty() {
            self.live = self.live.saturating_sub(1);
        }
        Ok(())
    }

    fn live_allocations(&self) -> usize {
        self.live
    }
}

/// Process-scoped owner of every geometry arena.
pub struct ArenaManager {
    settings: ArenaSettings,
    factory: Box<dyn BackingFactory>,
    arenas: HashMap<VertexLayoutId, GeometryArena>,
    releases: ReleaseQueue,
}

impl ArenaManager {
    pub fn new(settings: ArenaSettings, factory: Box<dyn BackingFactory>) -> Self {
        Self {
            settings,
            factory,
            arenas: HashMap::new(),
            releases: ReleaseQueue::new(),
        }
    }

    pub fn headless(settings: ArenaSettings) -> Self {
        Self::new(settings, Box::new(HostBackingFactory))
    }

    pub fn settings(&self) -> &ArenaSettings {
        &self.settings
    }

    pub fn factory(&self) -> &dyn BackingFactory {
        self.factory.as_ref()
    }

    pub fn arena(&self, layout: VertexLayoutId) -> Option<&GeometryArena> {
        self.arenas.get(&layout)
    }

    fn arena_mut(&mut self, layout: VertexLayoutId) -> &mut GeometryArena {
        let settings = &self.settings;
        let factory = self.factory.as_ref();
        self.arenas
            .entry(layout)
            .or_insert_with(|| GeometryArena::new(layout, settings, factory))
    }

    pub fn allocate(
        &mut self,
        layout: VertexLayoutId,
        vertex_bytes: u64,
        index_bytes: u64,
    ) -> Result<GeometryAllocation, ArenaError> {
        self.collect_released();
        self.arena_mut(layout).allocate(vertex_bytes, index_bytes)
    }

    /// Like [`allocate`](Self::allocate) but ties the allocation to a guard
    /// that releases it when dropped.
    pub fn allocate_owned(
        &mut self,
        layout: VertexLayoutId,
        vertex_bytes: u64,
        index_bytes: u64,
    ) -> Result<SegmentGuard, ArenaError> {
        let allocation = self.allocate(layout, vertex_bytes, index_bytes)?;
        Ok(SegmentGuard::new(allocation, self.releases.clone()))
    }

    /// Reserves space for `vertices`/`indices` and writes them in one step.
    pub fn upload(
        &mut self,
        layout: VertexLayoutId,
        vertices: &[u8],
        indices: &[u8],
    ) -> Result<SegmentGuard, ArenaError> {
        let guard = self.allocate_owned(layout, vertices.len() as u64, indices.len() as u64)?;
        let allocation = guard.allocation();
        self.write_vertices(allocation, 0, vertices)?;
        self.write_indices(allocation, 0, indices)?;
        Ok(guard)
    }

    pub fn write_vertices(
        &mut self,
        allocation: GeometryAllocation,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ArenaError> {
        let arena = self
            .arenas
            .get_mut(&allocation.layout)
            .ok_or(ArenaError::MissingArena(allocation.layout))?;
        arena.vertices.write(allocation.vertices, offset, bytes)
    }

    pub fn write_indices(
        &mut self,
        allocation: GeometryAllocation,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ArenaError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let arena = self
            .arenas
            .get_mut(&allocation.layout)
            .ok_or(ArenaError::MissingArena(allocation.layout))?;
        match &mut arena.indices {
            Some(buffer) => buffer.write(allocation.indices, offset, bytes),
            None => Err(ArenaError::IndicesUnsupported(allocation.layout)),
        }
    }

    pub fn free(&mut self, allocation: GeometryAllocation) -> Result<(), ArenaError> {
        let arena = self
            .arenas
            .get_mut(&allocation.layout)
            .ok_or(ArenaError::MissingArena(allocation.layout))?;
        arena.free(allocation)
    }

    /// Frees every allocation whose guard was dropped. Returns how many.
    pub fn collect_released(&mut self) -> usize {
        let pending = self.releases.drain();
        let count = pending.len();
        for allocation in pending {
            if let Err(err) = self.free(allocation) {
                log::error!("Deferred release failed: {}", err);
            }
        }
        count
    }

    pub fn live_allocations(&self) -> usize {
        self.arenas.values().map(GeometryArena::live_allocations).sum()
    }

    /// Drains pending releases and reports allocations that were never
    /// released. Returns the leak count.
    pub fn shutdown(&mut self) -> usize {
        self.collect_released();
        let mut leaked = 0;
        for arena in self.arenas.values() {
            let live = arena.live_allocations();
            if live > 0 {
                log::error!(
                    "{:?} arena still holds {} live segments at shutdown",
                    arena.layout(),
                    live
                );
            }
            leaked += live;
        }
        leaked
    }
}
