use std::cell::RefCell;
use std::rc::Rc;

use super::VertexLayoutId;

/// Contiguous byte range inside one arena buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub offset: u64,
    pub size: u64,
    pub generation: u32,
}

impl Segment {
    pub const EMPTY: Self = Self {
        offset: 0,
        size: 0,
        generation: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.offset < other.end()
            && other.offset < self.end()
    }
}

/// Vertex + index segment pair reserved in one layout's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryAllocation {
    pub layout: VertexLayoutId,
    pub vertices: Segment,
    pub indices: Segment,
}

impl GeometryAllocation {
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.size / self.layout.stride()) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.indices.is_empty()
    }
}

/// Items whose owners were dropped; drained by the allocator that handed
/// them out.
#[derive(Debug)]
pub struct ReleaseQueue<T = GeometryAllocation> {
    pending: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for ReleaseQueue<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Rc::clone(&self.pending),
        }
    }
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self {
            pending: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.pending.borrow_mut().push(item);
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

/// Exclusive owner of a geometry allocation.
///
/// Dropping the guard enqueues the allocation for release exactly once; the
/// arena manager frees it on its next drain. `release` does the same eagerly
/// and consumes the guard.
#[derive(Debug)]
pub struct SegmentGuard {
    allocation: GeometryAllocation,
    queue: ReleaseQueue,
}

impl SegmentGuard {
    pub(crate) fn new(allocation: GeometryAllocation, queue: ReleaseQueue) -> Self {
        Self { allocation, queue }
    }

    pub fn allocation(&self) -> GeometryAllocation {
        self.allocation
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        self.queue.push(self.allocation);
    }
}
