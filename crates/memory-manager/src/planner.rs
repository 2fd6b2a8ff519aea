// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Greedy offset planning for activation buffers.
//!
//! Buffers whose lifetimes never overlap may share the same bytes. The
//! planner places the largest buffers first, each at the lowest offset
//! that does not collide with an already-placed buffer alive at the same
//! time. This is the placement strategy micro-controller runtimes use for
//! their non-persistent arena region.

use crate::arena::align_up;

/// A buffer that needs an offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRequest {
    /// Size in bytes (rounded up to the arena alignment when placed).
    pub size: usize,
    /// First layer index at which the buffer must be resident.
    pub first: usize,
    /// Last layer index at which the buffer must be resident.
    pub last: usize,
    /// Label carried into allocation events (usually the tensor name).
    pub tag: String,
}

/// A request with its assigned offset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlannedBuffer {
    pub offset: usize,
    pub size: usize,
    pub first: usize,
    pub last: usize,
    pub tag: String,
}

impl PlannedBuffer {
    /// One past the last byte this buffer occupies.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    fn overlaps_in_time(&self, first: usize, last: usize) -> bool {
        self.first <= last && first <= self.last
    }
}

/// Greedy first-fit planner, largest buffer first.
#[derive(Debug, Default)]
pub struct GreedyPlanner {
    requests: Vec<BufferRequest>,
}

impl GreedyPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a buffer for placement.
    pub fn add(&mut self, request: BufferRequest) {
        self.requests.push(request);
    }

    /// Assigns offsets. The result is in request order.
    pub fn plan(&self) -> Vec<PlannedBuffer> {
        let mut order: Vec<usize> = (0..self.requests.len()).collect();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (&self.requests[a], &self.requests[b]);
            rb.size.cmp(&ra.size).then(ra.first.cmp(&rb.first))
        });

        let mut placed: Vec<(usize, PlannedBuffer)> = Vec::with_capacity(order.len());
        for idx in order {
            let req = &self.requests[idx];
            let size = align_up(req.size);

            let mut conflicts: Vec<&PlannedBuffer> = placed
                .iter()
                .map(|(_, p)| p)
                .filter(|p| p.overlaps_in_time(req.first, req.last))
                .collect();
            conflicts.sort_by_key(|p| p.offset);

            let mut offset = 0;
            for p in conflicts {
                if offset + size <= p.offset {
                    break;
                }
                offset = offset.max(p.end());
            }

            placed.push((
                idx,
                PlannedBuffer {
                    offset,
                    size,
                    first: req.first,
                    last: req.last,
                    tag: req.tag.clone(),
                },
            ));
        }

        placed.sort_by_key(|(idx, _)| *idx);
        placed.into_iter().map(|(_, p)| p).collect()
    }
}

/// Bytes spanned by a set of planned buffers.
pub fn planned_extent(buffers: &[PlannedBuffer]) -> usize {
    buffers.iter().map(PlannedBuffer::end).max().unwrap_or(0)
}
