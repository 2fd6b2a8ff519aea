// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

use crate::AllocationKind;

/// Errors that can occur during arena allocation, planning, and memory
/// plan reconstruction.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The requested allocation does not fit in the arena.
    #[error("out of memory: {kind} request for {requested_bytes} bytes, but only {available_bytes} available (arena: {arena_bytes})")]
    OutOfMemory {
        kind: AllocationKind,
        requested_bytes: usize,
        available_bytes: usize,
        arena_bytes: usize,
    },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A size string could not be parsed.
    #[error("invalid size '{input}': {reason}")]
    InvalidSize { input: String, reason: String },

    /// A recorded allocation event is malformed.
    #[error("invalid allocation event #{index}: {detail}")]
    InvalidEvent { index: usize, detail: String },

    /// Recorded events and per-layer usage disagree.
    #[error("memory plan mismatch: {0}")]
    PlanMismatch(String),
}
