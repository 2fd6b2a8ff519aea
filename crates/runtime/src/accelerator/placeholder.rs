// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The "no hardware accelerator" entry.

use super::Accelerator;

/// Reserved name of the software-only placeholder.
pub const PLACEHOLDER_ACCELERATOR: &str = "cmsis";

/// Stands for the optimized software kernels. Selecting it runs every
/// layer on the engine's own kernels, exactly as selecting no accelerator
/// does, but lets a model carry a `cmsis_memory_spec`.
#[derive(Debug, Clone)]
pub struct PlaceholderAccelerator {
    api_version: u32,
}

impl PlaceholderAccelerator {
    pub fn new(api_version: u32) -> Self {
        Self { api_version }
    }
}

impl Accelerator for PlaceholderAccelerator {
    fn name(&self) -> &str {
        PLACEHOLDER_ACCELERATOR
    }

    fn api_version(&self) -> u32 {
        self.api_version
    }
}
