//! Per-frame command recording and instancing.
//!
//! Producers append draw entries to a [`FrameCommandStore`] during scene
//! traversal. At flush time opaque and cutout buckets are sorted by
//! (material, geometry) and folded into instanced draws by the
//! [`InstanceBatcher`]; the translucent bucket is sorted back to front and
//! drawn one entry at a time.

pub mod batch;
pub mod plan;
pub mod store;

use std::fmt;

use thiserror::Error;

pub use batch::{sort_back_to_front, sort_for_batching, InstanceBatcher, InstancedDraw};
pub use plan::FramePlanner;
pub use store::{DrawEntry, FrameCommandStore, GeometryRef};

/// Position of the current frame in the fixed
/// reset -> record -> sort -> opaque -> translucent sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording,
    Sorted,
    OpaqueFlushed,
    TranslucentFlushed,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePhase::Idle => "idle",
            FramePhase::Recording => "recording",
            FramePhase::Sorted => "sorted",
            FramePhase::OpaqueFlushed => "opaque flushed",
            FramePhase::TranslucentFlushed => "translucent flushed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("{operation} is not allowed while the frame is {phase}")]
    OutOfOrder {
        operation: &'static str,
        phase: FramePhase,
    },
}

/// Enforces the frame phase order.
#[derive(Debug, Clone, Copy)]
pub struct FrameSequencer {
    phase: FramePhase,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Starts a new frame. Allowed from any phase; an unfinished frame is
    /// abandoned.
    pub fn reset(&mut self) {
        self.phase = FramePhase::Recording;
    }

    pub fn check_record(&self) -> Result<(), FrameError> {
        self.require("record", &[FramePhase::Recording])
    }

    /// Returns whether sorting still has to run.
    pub fn begin_sort(&mut self) -> Result<bool, FrameError> {
        self.require("sort", &[FramePhase::Recording, FramePhase::Sorted])?;
        let needs_sort = self.phase == FramePhase::Recording;
        self.phase = FramePhase::Sorted;
        Ok(needs_sort)
    }

    pub fn begin_opaque(&mut self) -> Result<(), FrameError> {
        self.require("flush_opaque", &[FramePhase::Sorted])?;
        self.phase = FramePhase::OpaqueFlushed;
        Ok(())
    }

    pub fn begin_translucent(&mut self) -> Result<(), FrameError> {
        self.require("flush_translucent", &[FramePhase::OpaqueFlushed])?;
        self.phase = FramePhase::TranslucentFlushed;
        Ok(())
    }

    fn require(&self, operation: &'static str, allowed: &[FramePhase]) -> Result<(), FrameError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(FrameError::OutOfOrder {
                operation,
                phase: self.phase,
            })
        }
    }
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub entries: u32,
    pub opaque_entries: u32,
    pub cutout_entries: u32,
    pub translucent_entries: u32,
    pub materials: u32,
    pub opaque_draw_calls: u32,
    pub translucent_draw_calls: u32,
    pub instanced_draws: u32,
    pub skinning_dispatches: u32,
    pub skipped_draws: u32,
}

impl FrameStats {
    pub fn total_draw_calls(&self) -> u32 {
        self.opaque_draw_calls + self.translucent_draw_calls
    }
}
