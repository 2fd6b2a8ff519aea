// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for profiling and diagnostics.

/// Cumulative statistics about one arena's usage.
///
/// The high-water mark is what a deployment must size its runtime buffer
/// to; it is reported back to callers as the runtime memory size.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AllocationStats {
    /// Bytes reserved at the head of the arena for planned activations.
    pub planned_bytes: usize,
    /// Number of persistent allocations.
    pub persistent_allocations: u64,
    /// Bytes taken from the tail of the arena.
    pub persistent_bytes: usize,
    /// Number of scratch allocations.
    pub scratch_allocations: u64,
    /// Largest scratch footprint observed at any one time.
    pub peak_scratch_bytes: usize,
    /// Number of scratch scopes released.
    pub scratch_releases: u64,
    /// Number of allocation requests that did not fit.
    pub oom_count: u64,
}

impl AllocationStats {
    /// Bytes the arena needed at its busiest point.
    pub fn high_water_mark(&self) -> usize {
        self.planned_bytes + self.peak_scratch_bytes + self.persistent_bytes
    }

    pub(crate) fn record_persistent(&mut self, size: usize) {
        self.persistent_allocations += 1;
        self.persistent_bytes += size;
    }

    pub(crate) fn record_scratch(&mut self, scratch_in_use: usize) {
        self.scratch_allocations += 1;
        if scratch_in_use > self.peak_scratch_bytes {
            self.peak_scratch_bytes = scratch_in_use;
        }
    }

    pub(crate) fn record_release(&mut self) {
        self.scratch_releases += 1;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Arena: {:.1} KB planned, {:.1} KB persistent ({} allocs), \
             {:.1} KB peak scratch ({} allocs), {} OOMs, high-water {:.1} KB",
            self.planned_bytes as f64 / 1024.0,
            self.persistent_bytes as f64 / 1024.0,
            self.persistent_allocations,
            self.peak_scratch_bytes as f64 / 1024.0,
            self.scratch_allocations,
            self.oom_count,
            self.high_water_mark() as f64 / 1024.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = AllocationStats::default();
        assert_eq!(s.high_water_mark(), 0);
        assert_eq!(s.oom_count, 0);
    }

    #[test]
    fn test_peak_scratch_tracking() {
        let mut s = AllocationStats::default();
        s.record_scratch(100);
        s.record_scratch(40);
        assert_eq!(s.peak_scratch_bytes, 100);
        s.record_scratch(250);
        assert_eq!(s.peak_scratch_bytes, 250);
        assert_eq!(s.scratch_allocations, 3);
    }

    #[test]
    fn test_high_water_mark() {
        let mut s = AllocationStats {
            planned_bytes: 1024,
            ..Default::default()
        };
        s.record_persistent(256);
        s.record_persistent(256);
        s.record_scratch(512);
        assert_eq!(s.high_water_mark(), 1024 + 512 + 512);
        assert!(s.summary().contains("2 allocs"));
    }
}
