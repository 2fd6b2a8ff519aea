// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Runtime arenas for micro-controller inference and the reconstruction of
//! memory plans from what an arena recorded.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a runtime buffer size with human-readable parsing
//!   (`"16M"`, `"512K"`, etc.).
//! - [`GreedyPlanner`]: assigns offsets to activation buffers so that
//!   buffers with disjoint lifetimes share bytes.
//! - [`Arena`]: a fixed byte region with a planned head, a downward-growing
//!   persistent tail, and per-layer scratch in between. Every allocation is
//!   recorded as an [`AllocationEvent`].
//! - [`ScratchScope`]: an RAII guard that releases a layer's scratch on drop.
//! - [`MemoryPlan`]: per-layer and aggregate usage rebuilt from recorded
//!   events, with an overlap-aware peak.
//! - [`AllocationStats`]: cumulative arena metrics.
//!
//! # Example
//! ```
//! use memory_manager::{Arena, BufferRequest, GreedyPlanner, MemoryPlan, LayerMemory};
//!
//! let mut planner = GreedyPlanner::new();
//! planner.add(BufferRequest { size: 256, first: 0, last: 0, tag: "a".into() });
//! planner.add(BufferRequest { size: 256, first: 1, last: 1, tag: "b".into() });
//! let planned = planner.plan();
//!
//! let mut arena = Arena::new(4096).unwrap();
//! arena.reserve_planned(&planned).unwrap();
//! arena.alloc_persistent(64, "op0").unwrap();
//!
//! let plan = MemoryPlan::reconstruct(
//!     arena.events().to_vec(),
//!     vec![LayerMemory::default(); 2],
//!     arena.persistent_bytes(),
//! )
//! .unwrap();
//! // "a" and "b" share offset 0, so the peak is one buffer, not two.
//! assert_eq!(plan.peak_temporary_bytes(), 256);
//! ```

mod arena;
mod budget;
mod error;
mod guard;
mod memory_plan;
mod planner;
mod stats;

pub use arena::{align_up, Arena, ALIGNMENT};
pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::ScratchScope;
pub use memory_plan::{AllocationEvent, AllocationKind, LayerMemory, MemoryPlan};
pub use planner::{planned_extent, BufferRequest, GreedyPlanner, PlannedBuffer};
pub use stats::AllocationStats;
