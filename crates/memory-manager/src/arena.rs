// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-size runtime arena.
//!
//! The arena is one contiguous byte region split three ways:
//!
//! ```text
//!  0                planned      scratch_top          tail          capacity
//!  ├── planned ──────┤── scratch ──┤───── free ─────────┤── persistent ──┤
//!      (head)           (grows up)                         (grows down)
//! ```
//!
//! - **Planned** activations are placed by the [`GreedyPlanner`](crate::GreedyPlanner)
//!   and reserved once at load time.
//! - **Persistent** allocations (kernel state, quantization params) are taken
//!   from the tail and live until the arena is dropped.
//! - **Scratch** allocations are per-layer and released when the layer's
//!   [`ScratchScope`] drops.
//!
//! Every allocation is recorded as an [`AllocationEvent`] so the memory plan
//! can be reconstructed afterwards.

use crate::guard::ScratchScope;
use crate::{AllocationEvent, AllocationKind, AllocationStats, MemoryError, PlannedBuffer};

/// Byte alignment of every arena allocation.
pub const ALIGNMENT: usize = 16;

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
pub fn align_up(n: usize) -> usize {
    n.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// A fixed-capacity arena with planned, persistent, and scratch regions.
pub struct Arena {
    data: Vec<u8>,
    planned: usize,
    pub(crate) scratch_top: usize,
    tail: usize,
    events: Vec<AllocationEvent>,
    pub(crate) stats: AllocationStats,
}

impl Arena {
    /// Creates a zero-filled arena of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, MemoryError> {
        if capacity == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        Ok(Self {
            data: vec![0u8; capacity],
            planned: 0,
            scratch_top: 0,
            tail: capacity,
            events: Vec::new(),
            stats: AllocationStats::default(),
        })
    }

    /// Bytes an arena needs for the given planned extent, persistent
    /// requests, and largest per-layer scratch footprint.
    pub fn required_bytes(planned_extent: usize, persistent: &[usize], peak_scratch: usize) -> usize {
        align_up(planned_extent)
            + persistent.iter().map(|&s| align_up(s)).sum::<usize>()
            + align_up(peak_scratch)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently free between scratch and persistent regions.
    pub fn available(&self) -> usize {
        self.tail - self.scratch_top
    }

    pub fn planned_bytes(&self) -> usize {
        self.planned
    }

    pub fn persistent_bytes(&self) -> usize {
        self.capacity() - self.tail
    }

    /// Reserves the head region for planned activation buffers.
    ///
    /// May be called once, before any scratch allocation.
    pub fn reserve_planned(&mut self, buffers: &[PlannedBuffer]) -> Result<(), MemoryError> {
        let extent = align_up(crate::planned_extent(buffers));
        if extent > self.tail {
            self.stats.record_oom();
            return Err(MemoryError::OutOfMemory {
                kind: AllocationKind::NonPersistent,
                requested_bytes: extent,
                available_bytes: self.tail,
                arena_bytes: self.capacity(),
            });
        }

        self.planned = extent;
        self.scratch_top = extent;
        self.stats.planned_bytes = extent;
        for buf in buffers {
            self.events.push(AllocationEvent {
                offset: buf.offset,
                size: buf.size,
                kind: AllocationKind::NonPersistent,
                tag: buf.tag.clone(),
                lifetime: Some((buf.first, buf.last)),
            });
        }
        tracing::debug!("reserved {} planned bytes for {} buffers", extent, buffers.len());
        Ok(())
    }

    /// Allocates `size` bytes from the tail. Returns the offset.
    pub fn alloc_persistent(&mut self, size: usize, tag: &str) -> Result<usize, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let size = align_up(size);
        if size > self.available() {
            self.stats.record_oom();
            return Err(MemoryError::OutOfMemory {
                kind: AllocationKind::Persistent,
                requested_bytes: size,
                available_bytes: self.available(),
                arena_bytes: self.capacity(),
            });
        }

        self.tail -= size;
        self.stats.record_persistent(size);
        self.events.push(AllocationEvent {
            offset: self.tail,
            size,
            kind: AllocationKind::Persistent,
            tag: tag.to_string(),
            lifetime: None,
        });
        Ok(self.tail)
    }

    /// Opens a scratch scope for `layer`. Scratch taken through the scope
    /// is released when it drops.
    pub fn scratch(&mut self, layer: usize) -> ScratchScope<'_> {
        ScratchScope::new(self, layer)
    }

    pub(crate) fn push_scratch(
        &mut self,
        size: usize,
        tag: &str,
        layer: usize,
    ) -> Result<usize, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let size = align_up(size);
        if size > self.available() {
            self.stats.record_oom();
            return Err(MemoryError::OutOfMemory {
                kind: AllocationKind::Scratch,
                requested_bytes: size,
                available_bytes: self.available(),
                arena_bytes: self.capacity(),
            });
        }

        let offset = self.scratch_top;
        self.scratch_top += size;
        self.stats.record_scratch(self.scratch_top - self.planned);
        self.events.push(AllocationEvent {
            offset,
            size,
            kind: AllocationKind::Scratch,
            tag: tag.to_string(),
            lifetime: Some((layer, layer)),
        });
        Ok(offset)
    }

    pub(crate) fn release_scratch(&mut self) {
        self.scratch_top = self.planned;
        self.stats.record_release();
    }

    /// Returns `len` bytes at `offset`, or `None` if out of bounds.
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }

    /// Mutable variant of [`Arena::bytes`].
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.data.get_mut(offset..offset.checked_add(len)?)
    }

    /// All allocation events recorded so far, in order.
    pub fn events(&self) -> &[AllocationEvent] {
        &self.events
    }

    pub fn stats(&self) -> &AllocationStats {
        &self.stats
    }

    /// Drops recorded scratch events so the next pass starts a fresh trace.
    /// Planned and persistent events are kept.
    pub fn forget_scratch_events(&mut self) {
        self.events.retain(|e| e.kind != AllocationKind::Scratch);
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("planned", &self.planned)
            .field("scratch_top", &self.scratch_top)
            .field("tail", &self.tail)
            .field("events", &self.events.len())
            .finish()
    }
}
