// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII scope that releases a layer's scratch memory on drop.
//!
//! A kernel's scratch buffers only live while that kernel runs. Tying them
//! to a [`ScratchScope`] means the next layer always starts with the full
//! scratch region available, even if the kernel returned early with an
//! error.

use crate::{Arena, MemoryError};
use std::ops::{Deref, DerefMut};

/// Scratch allocation scope for one layer.
///
/// # Example
/// ```
/// use memory_manager::Arena;
///
/// let mut arena = Arena::new(1024).unwrap();
/// {
///     let mut scope = arena.scratch(0);
///     let offset = scope.alloc(128, "im2col").unwrap();
///     scope.bytes_mut(offset, 128).unwrap().fill(0xAA);
/// } // scratch released here
/// assert_eq!(arena.available(), 1024);
/// ```
pub struct ScratchScope<'a> {
    arena: &'a mut Arena,
    layer: usize,
}

impl<'a> ScratchScope<'a> {
    pub(crate) fn new(arena: &'a mut Arena, layer: usize) -> Self {
        Self { arena, layer }
    }

    /// Takes `size` bytes of scratch for this layer. Returns the offset.
    pub fn alloc(&mut self, size: usize, tag: &str) -> Result<usize, MemoryError> {
        self.arena.push_scratch(size, tag, self.layer)
    }

    /// The layer this scope belongs to.
    pub fn layer(&self) -> usize {
        self.layer
    }
}

impl Deref for ScratchScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl DerefMut for ScratchScope<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        self.arena
    }
}

impl Drop for ScratchScope<'_> {
    fn drop(&mut self) {
        self.arena.release_scratch();
    }
}

impl std::fmt::Debug for ScratchScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchScope")
            .field("layer", &self.layer)
            .field("scratch_in_use", &(self.arena.scratch_top - self.arena.planned_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{AllocationKind, Arena, MemoryError};

    #[test]
    fn test_scope_releases_on_drop() {
        let mut arena = Arena::new(512).unwrap();
        {
            let mut scope = arena.scratch(2);
            scope.alloc(100, "a").unwrap();
            scope.alloc(50, "b").unwrap();
            assert_eq!(scope.available(), 512 - 112 - 64);
        }
        assert_eq!(arena.available(), 512);
        assert_eq!(arena.stats().peak_scratch_bytes, 176);
        assert_eq!(arena.stats().scratch_releases, 1);

        let scratch: Vec<_> = arena
            .events()
            .iter()
            .filter(|e| e.kind == AllocationKind::Scratch)
            .collect();
        assert_eq!(scratch.len(), 2);
        assert!(scratch.iter().all(|e| e.lifetime == Some((2, 2))));
    }

    #[test]
    fn test_scratch_reuses_space_across_layers() {
        let mut arena = Arena::new(256).unwrap();
        for layer in 0..4 {
            let mut scope = arena.scratch(layer);
            assert_eq!(scope.alloc(200, "buf").unwrap(), 0);
        }
        assert_eq!(arena.stats().scratch_allocations, 4);
    }

    #[test]
    fn test_scratch_oom_still_releases() {
        let mut arena = Arena::new(128).unwrap();
        arena.alloc_persistent(64, "state").unwrap();
        {
            let mut scope = arena.scratch(0);
            scope.alloc(48, "ok").unwrap();
            let err = scope.alloc(32, "too_big").unwrap_err();
            assert!(matches!(
                err,
                MemoryError::OutOfMemory {
                    kind: AllocationKind::Scratch,
                    ..
                }
            ));
        }
        assert_eq!(arena.available(), 64);
    }
}
