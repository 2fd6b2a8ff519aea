// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model loading from manifest + `.tflite` files.
//!
//! A model directory contains:
//! - `model.json`: the descriptor manifest (see [`ModelManifest`]).
//! - `model.tflite`: the serialized flatbuffer.
//!
//! The flatbuffer is memory-mapped, never copied; the runtime receives a
//! slice into the mapping.

use crate::handle::FlatbufferData;
use crate::{ModelError, ModelHandle, ModelManifest};
use std::path::Path;

/// Default manifest filename.
const MANIFEST_FILE: &str = "model.json";

/// Default flatbuffer filename.
const FLATBUFFER_FILE: &str = "model.tflite";

/// Loads models from disk into a [`ModelHandle`].
///
/// # Example
/// ```no_run
/// use model_ir::ModelLoader;
/// use std::path::Path;
///
/// let model = ModelLoader::load(Path::new("./models/kws")).unwrap();
/// println!("{}", model.graph().summary());
/// ```
pub struct ModelLoader;

impl ModelLoader {
    /// Loads and validates a model from the given directory.
    pub fn load(model_dir: &Path) -> Result<ModelHandle, ModelError> {
        let manifest = ModelManifest::from_file(&model_dir.join(MANIFEST_FILE))?;
        let flatbuffer_path = model_dir.join(FLATBUFFER_FILE);
        let flatbuffer = Self::map_flatbuffer(&flatbuffer_path)?;

        let model = Self::from_manifest_and_flatbuffer(&manifest, flatbuffer)?
            .with_path(flatbuffer_path);
        tracing::info!("loaded {}", model.graph().summary());
        Ok(model)
    }

    /// Builds a model from an in-memory manifest and flatbuffer.
    ///
    /// Useful for testing without files on disk.
    pub fn from_manifest_and_flatbuffer(
        manifest: &ModelManifest,
        flatbuffer: FlatbufferData,
    ) -> Result<ModelHandle, ModelError> {
        manifest.validate()?;
        let graph = manifest.to_graph()?.validate()?;
        let metadata = manifest.metadata_bytes()?;
        tracing::debug!(
            "model '{}': {} metadata entries, {} flatbuffer bytes",
            graph.name,
            metadata.len(),
            flatbuffer.len()
        );
        ModelHandle::new(graph, flatbuffer, metadata)
    }

    /// Memory-maps a `.tflite` file.
    fn map_flatbuffer(path: &Path) -> Result<FlatbufferData, ModelError> {
        let file = std::fs::File::open(path).map_err(|e| ModelError::FlatbufferError {
            path: path.display().to_string(),
            detail: format!("cannot open: {e}"),
        })?;

        // SAFETY: the mapping is read-only and the handle owns it for the
        // lifetime of the model. Concurrent truncation of the file by another
        // process is outside what this loader guards against.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
            ModelError::FlatbufferError {
                path: path.display().to_string(),
                detail: format!("mmap failed: {e}"),
            }
        })?;

        Ok(FlatbufferData::Mapped(mmap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TFLITE_FILE_IDENTIFIER;

    const MANIFEST: &str = r#"{
        "name": "sine",
        "tensors": [
            { "name": "x", "shape": [1, 1], "dtype": "f32" },
            { "name": "w", "shape": [16, 1], "dtype": "f32", "constant": true },
            { "name": "h", "shape": [1, 16], "dtype": "f32" },
            { "name": "y", "shape": [1, 1], "dtype": "f32" }
        ],
        "layers": [
            { "op": "fully_connected", "inputs": [0, 1], "outputs": [2] },
            { "op": "fully_connected", "inputs": [2], "outputs": [3] }
        ],
        "inputs": [0],
        "outputs": [3],
        "metadata": { "sim_memory_spec": { "sizes": [2048] } }
    }"#;

    fn write_model_dir(dir: &Path) {
        std::fs::write(dir.join(MANIFEST_FILE), MANIFEST).unwrap();
        let mut fb = vec![0u8; 128];
        fb[4..8].copy_from_slice(TFLITE_FILE_IDENTIFIER);
        std::fs::write(dir.join(FLATBUFFER_FILE), fb).unwrap();
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path());

        let model = ModelLoader::load(dir.path()).unwrap();
        assert_eq!(model.name(), "sine");
        assert_eq!(model.graph().num_layers(), 2);
        assert_eq!(model.flatbuffer().len(), 128);
        assert!(model.flatbuffer().has_tflite_identifier());
        assert!(matches!(model.flatbuffer(), FlatbufferData::Mapped(_)));
        assert_eq!(model.memory_spec("sim").unwrap().sizes, vec![2048]);
        assert_eq!(
            model.path(),
            Some(dir.path().join(FLATBUFFER_FILE).as_path())
        );
    }

    #[test]
    fn test_missing_flatbuffer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        let err = ModelLoader::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::FlatbufferError { .. }));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelLoader::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::ReadError(_)));
    }

    #[test]
    fn test_in_memory() {
        let manifest = ModelManifest::from_json(MANIFEST).unwrap();
        let mut fb = vec![0u8; 16];
        fb[4..8].copy_from_slice(TFLITE_FILE_IDENTIFIER);
        let model =
            ModelLoader::from_manifest_and_flatbuffer(&manifest, FlatbufferData::Owned(fb))
                .unwrap();
        assert_eq!(model.graph().tensors.len(), 4);
        assert!(model.path().is_none());
    }
}
