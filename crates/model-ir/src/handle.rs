// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared, read-only model descriptor handed to the runtime.

use crate::graph::Validated;
use crate::{ModelError, ModelGraph};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File identifier every `.tflite` flatbuffer carries at bytes 4..8.
pub const TFLITE_FILE_IDENTIFIER: &[u8; 4] = b"TFL3";

/// Backing storage of the serialized model.
pub enum FlatbufferData {
    /// Bytes held in memory (built in-process or read from a stream).
    Owned(Vec<u8>),
    /// Bytes memory-mapped from a `.tflite` file.
    Mapped(memmap2::Mmap),
}

impl FlatbufferData {
    /// Returns the serialized model bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Mapped(mmap) => mmap,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Returns `true` if the payload carries the `TFL3` file identifier.
    pub fn has_tflite_identifier(&self) -> bool {
        self.as_bytes().get(4..8) == Some(&TFLITE_FILE_IDENTIFIER[..])
    }
}

impl std::fmt::Debug for FlatbufferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Owned(_) => "Owned",
            Self::Mapped(_) => "Mapped",
        };
        write!(f, "FlatbufferData::{kind}({} bytes)", self.len())
    }
}

/// Per-accelerator runtime memory sizing stored in model metadata under
/// the tag `<accelerator>_memory_spec`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemorySpec {
    /// One size per runtime memory region, in bytes.
    pub sizes: Vec<usize>,
}

#[derive(Debug)]
struct ModelInner {
    graph: ModelGraph<Validated>,
    flatbuffer: FlatbufferData,
    metadata: BTreeMap<String, Vec<u8>>,
    path: Option<PathBuf>,
}

/// A loaded model: validated graph, serialized flatbuffer, and metadata.
///
/// Cloning is cheap; clones share the same underlying storage. Sessions
/// keep a clone so the flatbuffer outlives the native load.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    inner: Arc<ModelInner>,
}

impl ModelHandle {
    /// Wraps a validated graph and its serialized bytes.
    pub fn new(
        graph: ModelGraph<Validated>,
        flatbuffer: FlatbufferData,
        metadata: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, ModelError> {
        if flatbuffer.is_empty() {
            return Err(ModelError::FlatbufferError {
                path: graph.name.clone(),
                detail: "flatbuffer is empty".into(),
            });
        }
        if !flatbuffer.has_tflite_identifier() {
            tracing::warn!(
                "model '{}' flatbuffer does not carry the TFL3 identifier",
                graph.name
            );
        }
        Ok(Self {
            inner: Arc::new(ModelInner {
                graph,
                flatbuffer,
                metadata,
                path: None,
            }),
        })
    }

    pub(crate) fn with_path(mut self, path: PathBuf) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.path = Some(path);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.graph.name
    }

    pub fn graph(&self) -> &ModelGraph<Validated> {
        &self.inner.graph
    }

    pub fn flatbuffer(&self) -> &FlatbufferData {
        &self.inner.flatbuffer
    }

    /// The `.tflite` file this model was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Returns the metadata payload stored under `tag`.
    ///
    /// Tags match case-insensitively.
    pub fn metadata(&self, tag: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.inner.metadata.get(tag) {
            return Some(bytes);
        }
        self.inner
            .metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(tag))
            .map(|(_, v)| v.as_slice())
    }

    /// Returns all metadata tags, sorted.
    pub fn metadata_tags(&self) -> impl Iterator<Item = &str> {
        self.inner.metadata.keys().map(String::as_str)
    }

    /// Returns the memory sizing this model declares for `accelerator`.
    ///
    /// A missing tag yields `None`. A payload that fails to parse is
    /// logged and also yields `None`, so callers fall back to defaults.
    pub fn memory_spec(&self, accelerator: &str) -> Option<MemorySpec> {
        let tag = format!("{}_memory_spec", accelerator.to_lowercase());
        let payload = self.metadata(&tag)?;
        match serde_json::from_slice::<MemorySpec>(payload) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!("ignoring malformed metadata '{tag}': {e}");
                None
            }
        }
    }
}
