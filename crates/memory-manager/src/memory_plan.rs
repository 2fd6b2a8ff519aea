// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory plan reconstruction from recorded allocator events.
//!
//! The recorder hands back three things: the raw arena event stream, the
//! temporary/persistent byte counts attributed to each layer, and a single
//! persistent total for the whole model. [`MemoryPlan::reconstruct`] checks
//! them and derives the figures a report needs.
//!
//! Peak temporary usage is **not** the sum of per-layer temporary usage.
//! Planned buffers share offsets across layers and scratch is reused, so
//! the peak is the largest number of distinct bytes covered by live
//! non-persistent events at any one layer.

use crate::MemoryError;
use std::fmt;

/// Which arena region an allocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// Lives for the whole session.
    Persistent,
    /// Planned activation buffer, live over a range of layers.
    NonPersistent,
    /// Per-layer temporary buffer.
    Scratch,
}

impl AllocationKind {
    pub fn is_temporary(self) -> bool {
        !matches!(self, Self::Persistent)
    }
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Persistent => "persistent",
            Self::NonPersistent => "non-persistent",
            Self::Scratch => "scratch",
        })
    }
}

/// One recorded arena allocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AllocationEvent {
    /// Byte offset into the arena.
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
    pub kind: AllocationKind,
    /// What the bytes were for (tensor name, kernel label).
    pub tag: String,
    /// Inclusive `(first, last)` layer range during which the bytes are in
    /// use. `None` means live for the whole run.
    pub lifetime: Option<(usize, usize)>,
}

impl AllocationEvent {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Returns `true` if the event is in use while `layer` executes.
    pub fn is_live_at(&self, layer: usize) -> bool {
        match self.lifetime {
            Some((first, last)) => first <= layer && layer <= last,
            None => true,
        }
    }
}

/// Memory attributed to one layer during recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LayerMemory {
    /// Temporary (scratch + activation) bytes the layer touched.
    pub temporary_bytes: usize,
    /// Persistent bytes the layer requested at load time.
    pub persistent_bytes: usize,
}

/// Per-layer and aggregate memory layout of one recorded run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemoryPlan {
    layers: Vec<LayerMemory>,
    events: Vec<AllocationEvent>,
    total_persistent_bytes: usize,
    peak_temporary_bytes: usize,
    peak_layer: Option<usize>,
}

impl MemoryPlan {
    /// Builds a plan from recorded data.
    ///
    /// Fails if an event is empty, has an inverted lifetime, overflows the
    /// address space, or refers to a layer the model does not have.
    pub fn reconstruct(
        events: Vec<AllocationEvent>,
        layers: Vec<LayerMemory>,
        total_persistent_bytes: usize,
    ) -> Result<Self, MemoryError> {
        for (index, event) in events.iter().enumerate() {
            if event.size == 0 {
                return Err(MemoryError::InvalidEvent {
                    index,
                    detail: format!("'{}' has zero size", event.tag),
                });
            }
            if event.offset.checked_add(event.size).is_none() {
                return Err(MemoryError::InvalidEvent {
                    index,
                    detail: format!("'{}' overflows the address space", event.tag),
                });
            }
            if let Some((first, last)) = event.lifetime {
                if first > last {
                    return Err(MemoryError::InvalidEvent {
                        index,
                        detail: format!("'{}' lifetime {first}..={last} is inverted", event.tag),
                    });
                }
                if !layers.is_empty() && last >= layers.len() {
                    return Err(MemoryError::PlanMismatch(format!(
                        "event '{}' is live at layer {last}, but only {} layers were recorded",
                        event.tag,
                        layers.len()
                    )));
                }
            }
        }

        let mut plan = Self {
            layers,
            events,
            total_persistent_bytes,
            peak_temporary_bytes: 0,
            peak_layer: None,
        };

        let steps = plan.time_steps();
        for layer in 0..steps {
            let usage = plan.temporary_bytes_at(layer);
            if plan.peak_layer.is_none() || usage > plan.peak_temporary_bytes {
                plan.peak_temporary_bytes = usage;
                plan.peak_layer = Some(layer);
            }
        }

        tracing::debug!(
            "memory plan: {} events over {} steps, peak temporary {} bytes",
            plan.events.len(),
            steps,
            plan.peak_temporary_bytes
        );
        Ok(plan)
    }

    /// Number of distinct time points the events span.
    fn time_steps(&self) -> usize {
        if !self.layers.is_empty() {
            return self.layers.len();
        }
        let last = self
            .events
            .iter()
            .filter_map(|e| e.lifetime.map(|(_, last)| last + 1))
            .max();
        match last {
            Some(n) => n,
            None if self.events.is_empty() => 0,
            None => 1,
        }
    }

    /// Distinct temporary bytes in use while `layer` executes.
    ///
    /// Overlapping events are counted once: the result is the length of the
    /// union of live `[offset, offset + size)` intervals.
    pub fn temporary_bytes_at(&self, layer: usize) -> usize {
        let mut intervals: Vec<(usize, usize)> = self
            .events
            .iter()
            .filter(|e| e.kind.is_temporary() && e.is_live_at(layer))
            .map(|e| (e.offset, e.end()))
            .collect();
        union_length(&mut intervals)
    }

    /// Largest temporary footprint at any point of the run.
    pub fn peak_temporary_bytes(&self) -> usize {
        self.peak_temporary_bytes
    }

    /// Layer at which the temporary peak occurs.
    pub fn peak_layer(&self) -> Option<usize> {
        self.peak_layer
    }

    /// Sum of per-layer temporary usage. Always `>=` the peak for real
    /// recordings; never use it as a footprint.
    pub fn sum_temporary_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.temporary_bytes).sum()
    }

    pub fn total_persistent_bytes(&self) -> usize {
        self.total_persistent_bytes
    }

    /// Highest arena address any event touched.
    pub fn arena_extent(&self) -> usize {
        self.events.iter().map(AllocationEvent::end).max().unwrap_or(0)
    }

    pub fn layer(&self, index: usize) -> Option<&LayerMemory> {
        self.layers.get(index)
    }

    pub fn layers(&self) -> &[LayerMemory] {
        &self.layers
    }

    pub fn events(&self) -> &[AllocationEvent] {
        &self.events
    }

    /// Events live while `layer` executes, in recorded order.
    pub fn events_at(&self, layer: usize) -> impl Iterator<Item = &AllocationEvent> {
        self.events.iter().filter(move |e| e.is_live_at(layer))
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Memory plan: {} layers, peak temporary {:.1} KB{}, persistent {:.1} KB, \
             {} events, arena extent {:.1} KB",
            self.layers.len(),
            self.peak_temporary_bytes as f64 / 1024.0,
            self.peak_layer
                .map(|l| format!(" at layer {l}"))
                .unwrap_or_default(),
            self.total_persistent_bytes as f64 / 1024.0,
            self.events.len(),
            self.arena_extent() as f64 / 1024.0,
        )
    }
}

/// Sorts half-open intervals and returns the length of their union.
fn union_length(intervals: &mut [(usize, usize)]) -> usize {
    intervals.sort_unstable();
    let mut total = 0;
    let mut current: Option<(usize, usize)> = None;
    for &(start, end) in intervals.iter() {
        current = match current {
            Some((cs, ce)) if start <= ce => Some((cs, ce.max(end))),
            Some((cs, ce)) => {
                total += ce - cs;
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((cs, ce)) = current {
        total += ce - cs;
    }
    total
}
