use std::collections::HashMap;

use super::segment::Segment;
use super::ArenaError;

/// Allocation granularity for every arena range. Matches the copy alignment
/// so grown buffers can be copied without re-packing.
pub const ARENA_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

#[inline]
pub fn align_up(size: u64) -> u64 {
    size.div_ceil(ARENA_ALIGNMENT) * ARENA_ALIGNMENT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    pub old_capacity: u64,
    pub new_capacity: u64,
}

/// Result of a successful reservation. `growth` is set when the backing
/// buffer must be enlarged before the segment can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub segment: Segment,
    pub growth: Option<Growth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    offset: u64,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
struct LiveRange {
    size: u64,
    generation: u32,
}

/// Byte-range allocator behind every arena buffer.
///
/// Placement order: best fit in the free list, then bump at the watermark,
/// then capacity doubling up to `ceiling`. Free ranges are kept sorted by
/// offset and coalesced with their neighbours; a free range touching the
/// watermark is folded back into it.
#[derive(Debug)]
pub struct RangeAllocator {
    capacity: u64,
    ceiling: u64,
    watermark: u64,
    free: Vec<FreeRange>,
    live: HashMap<u64, LiveRange>,
    used: u64,
    next_generation: u32,
}

impl RangeAllocator {
    pub fn new(initial_capacity: u64, ceiling: u64) -> Self {
        let ceiling = align_up(ceiling.max(ARENA_ALIGNMENT));
        let capacity = align_up(initial_capacity.max(ARENA_ALIGNMENT)).min(ceiling);
        Self {
            capacity,
            ceiling,
            watermark: 0,
            free: Vec::new(),
            live: HashMap::new(),
            used: 0,
            next_generation: 1,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity - self.used
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, segment: Segment) -> bool {
        self.live
            .get(&segment.offset)
            .is_some_and(|live| live.generation == segment.generation && live.size == segment.size)
    }

    pub fn allocate(&mut self, size: u64) -> Result<Placement, ArenaError> {
        if size == 0 {
            return Ok(Placement {
                segment: Segment::EMPTY,
                growth: None,
            });
        }

        let size = align_up(size);
        if size > self.ceiling {
            return Err(ArenaError::CapacityExceeded {
                requested: size,
                ceiling: self.ceiling,
            });
        }

        if let Some(offset) = self.take_best_fit(size) {
            return Ok(Placement {
                segment: self.commit(offset, size),
                growth: None,
            });
        }

        let end = self.watermark + size;
        let mut growth = None;
        if end > self.capacity {
            if end > self.ceiling {
                return Err(ArenaError::CapacityExceeded {
                    requested: size,
                    ceiling: self.ceiling,
                });
            }
            let mut new_capacity = self.capacity.max(ARENA_ALIGNMENT);
            while new_capacity < end {
                new_capacity = new_capacity.saturating_mul(2);
            }
            let new_capacity = new_capacity.min(self.ceiling);
            growth = Some(Growth {
                old_capacity: self.capacity,
                new_capacity,
            });
            self.capacity = new_capacity;
        }

        let offset = self.watermark;
        self.watermark = end;
        Ok(Placement {
            segment: self.commit(offset, size),
            growth,
        })
    }

    pub fn free(&mut self, segment: Segment) -> Result<(), ArenaError> {
        if segment.is_empty() {
            return Ok(());
        }

        match self.live.get(&segment.offset) {
            Some(live) if live.generation == segment.generation && live.size == segment.size => {}
            _ => {
                return Err(ArenaError::UnknownSegment {
                    offset: segment.offset,
                    generation: segment.generation,
                })
            }
        }

        self.live.remove(&segment.offset);
        self.used -= segment.size;
        self.insert_free(FreeRange {
            offset: segment.offset,
            size: segment.size,
        });
        Ok(())
    }

    fn commit(&mut self, offset: u64, size: u64) -> Segment {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        self.live.insert(offset, LiveRange { size, generation });
        self.used += size;
        Segment {
            offset,
            size,
            generation,
        }
    }

    fn take_best_fit(&mut self, size: u64) -> Option<u64> {
        let (index, range) = self
            .free
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, range)| range.size >= size)
            .min_by_key(|(_, range)| range.size)?;

        if range.size == size {
            self.free.remove(index);
        } else {
            self.free[index] = FreeRange {
                offset: range.offset + size,
                size: range.size - size,
            };
        }
        Some(range.offset)
    }

    fn insert_free(&mut self, range: FreeRange) {
        let index = self.free.partition_point(|r| r.offset < range.offset);
        self.free.insert(index, range);

        // merge with the following range first so `index` stays valid
        if index + 1 < self.free.len() {
            let next = self.free[index + 1];
            let current = self.free[index];
            if current.offset + current.size == next.offset {
                self.free[index].size += next.size;
                self.free.remove(index + 1);
            }
        }
        let mut index = index;
        if index > 0 {
            let prev = self.free[index - 1];
            let current = self.free[index];
            if prev.offset + prev.size == current.offset {
                self.free[index - 1].size += current.size;
                self.free.remove(index);
                index -= 1;
            }
        }

        let tail = self.free[index];
        if tail.offset + tail.size == self.watermark {
            self.watermark = tail.offset;
            self.free.remove(index);
        }
    }

    #[cfg(test)]
    pub(crate) fn free_range_count(&self) -> usize {
        self.free.len()
    }
}
