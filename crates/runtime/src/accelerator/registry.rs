// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator registry keyed by variant name.

use super::{Accelerator, RegisteredAccelerator};
use crate::RuntimeError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registered accelerators, reachable by any of their variant names.
///
/// Names are matched case-insensitively and stored lowercase; the
/// lowercase form is the canonical name [`resolve`](Self::resolve) returns.
#[derive(Debug)]
pub struct AcceleratorRegistry {
    runtime_api_version: u32,
    entries: BTreeMap<String, RegisteredAccelerator>,
}

impl AcceleratorRegistry {
    /// Creates an empty registry for a runtime reporting `runtime_api_version`.
    pub fn new(runtime_api_version: u32) -> Self {
        Self {
            runtime_api_version,
            entries: BTreeMap::new(),
        }
    }

    pub fn runtime_api_version(&self) -> u32 {
        self.runtime_api_version
    }

    /// Registers every variant of `descriptor`.
    ///
    /// All-or-nothing: on error the registry is unchanged. Returns the
    /// canonical names that were added.
    pub fn register(&mut self, descriptor: Arc<dyn Accelerator>) -> Result<Vec<String>, RuntimeError> {
        let version = descriptor.api_version();
        if version != self.runtime_api_version {
            return Err(RuntimeError::VersionMismatch {
                accelerator: descriptor.name().to_string(),
                accelerator_version: version,
                runtime_version: self.runtime_api_version,
            });
        }

        let mut variants = descriptor.variants();
        if variants.is_empty() {
            variants.push(descriptor.name().to_string());
        }

        let mut seen = BTreeSet::new();
        let mut canonical = Vec::with_capacity(variants.len());
        for variant in &variants {
            let key = normalize(variant);
            if key.is_empty() {
                return Err(RuntimeError::InvalidOption(format!(
                    "accelerator '{}' declares an empty variant name",
                    descriptor.name()
                )));
            }
            if self.entries.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(RuntimeError::DuplicateVariant {
                    variant: variant.clone(),
                });
            }
            canonical.push(key);
        }

        for key in &canonical {
            self.entries.insert(
                key.clone(),
                RegisteredAccelerator::new(Arc::clone(&descriptor), key.clone()),
            );
        }
        tracing::info!(
            "registered accelerator '{}' (variants: {})",
            descriptor.name(),
            canonical.join(", ")
        );
        Ok(canonical)
    }

    /// Returns the canonical name for `name`, or `None` if unknown.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let key = normalize(name);
        self.entries.contains_key(&key).then_some(key)
    }

    /// Returns the entry registered under `name`.
    pub fn get(&self, name: &str) -> Result<RegisteredAccelerator, RuntimeError> {
        self.entries
            .get(&normalize(name))
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownAccelerator {
                name: name.to_string(),
                known: self.names(),
            })
    }

    /// All canonical variant names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
