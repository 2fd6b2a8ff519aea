// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON model manifest parsing.
//!
//! The manifest (`model.json`) sits next to the `.tflite` flatbuffer and
//! describes the operator list, the tensor table, and the metadata entries
//! the host tools attach to the model.
//!
//! # Format
//! ```json
//! {
//!   "name": "keyword_spotting",
//!   "tensors": [
//!     { "name": "input", "shape": [1, 49, 40, 1], "dtype": "int8" },
//!     { "name": "conv_w", "shape": [8, 3, 3, 1], "dtype": "int8", "constant": true },
//!     { "name": "conv_out", "shape": [1, 25, 20, 8], "dtype": "int8" }
//!   ],
//!   "layers": [
//!     { "op": "CONV_2D", "inputs": [0, 1], "outputs": [2], "options": { "stride": 2 } }
//!   ],
//!   "inputs": [0],
//!   "outputs": [2],
//!   "metadata": {
//!     "simulated_memory_spec": { "sizes": [65536] },
//!     "classes": "yes,no,unknown"
//!   }
//! }
//! ```

use crate::{LayerDef, ModelError, ModelGraph, OpCode, TensorSpec};
use std::collections::BTreeMap;
use std::path::Path;
use tensor_core::{DType, Shape};

/// Top-level model manifest, deserialized from `model.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    /// Human-readable model name.
    pub name: String,
    /// Tensor table; position in this list is the tensor index.
    pub tensors: Vec<ManifestTensor>,
    /// Operators in execution order.
    pub layers: Vec<ManifestLayer>,
    /// Model input tensor indices.
    pub inputs: Vec<usize>,
    /// Model output tensor indices.
    pub outputs: Vec<usize>,
    /// Named metadata entries. String values are stored as their raw
    /// bytes; any other JSON value is stored as its serialized form.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A single tensor entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestTensor {
    pub name: String,
    pub shape: Vec<usize>,
    /// Dtype string (e.g. `"int8"`, `"f32"`).
    pub dtype: String,
    #[serde(default)]
    pub constant: bool,
}

/// A single layer entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestLayer {
    /// Op code string (e.g. `"CONV_2D"`, `"fully_connected"`).
    pub op: String,
    /// Optional display name; defaults to `op<index>-<op_code>`.
    #[serde(default)]
    pub name: Option<String>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ModelManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Validates that the manifest is internally consistent.
    ///
    /// Checks:
    /// - At least one layer is defined.
    /// - All dtype strings are recognised.
    /// - No duplicate tensor names.
    /// - No duplicate metadata tags (tags compare case-insensitively).
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph(
                "manifest contains no layers".into(),
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        for tensor in &self.tensors {
            if DType::from_str_loose(&tensor.dtype).is_none() {
                return Err(ModelError::InvalidTensor {
                    tensor: tensor.name.clone(),
                    detail: format!("unsupported dtype '{}'", tensor.dtype),
                });
            }
            if !seen_names.insert(&tensor.name) {
                return Err(ModelError::InvalidTensor {
                    tensor: tensor.name.clone(),
                    detail: "duplicate tensor name".into(),
                });
            }
        }

        let mut seen_tags = std::collections::HashSet::new();
        for tag in self.metadata.keys() {
            if !seen_tags.insert(tag.to_lowercase()) {
                return Err(ModelError::InvalidGraph(format!(
                    "duplicate metadata tag '{tag}'"
                )));
            }
        }

        Ok(())
    }

    /// Builds an unvalidated [`ModelGraph`] from the manifest.
    pub fn to_graph(&self) -> Result<ModelGraph, ModelError> {
        let tensors = self
            .tensors
            .iter()
            .enumerate()
            .map(|(index, t)| {
                let dtype = DType::from_str_loose(&t.dtype).ok_or_else(|| {
                    ModelError::InvalidTensor {
                        tensor: t.name.clone(),
                        detail: format!("unsupported dtype '{}'", t.dtype),
                    }
                })?;
                Ok(TensorSpec {
                    index,
                    name: t.name.clone(),
                    shape: Shape::new(t.shape.clone()),
                    dtype,
                    constant: t.constant,
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let layers = self
            .layers
            .iter()
            .enumerate()
            .map(|(index, l)| {
                let op_code = OpCode::parse(&l.op);
                LayerDef {
                    index,
                    name: l
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("op{index}-{op_code}")),
                    op_code,
                    inputs: l.inputs.clone(),
                    outputs: l.outputs.clone(),
                    options: l.options.clone(),
                }
            })
            .collect();

        Ok(ModelGraph::new(
            self.name.clone(),
            tensors,
            layers,
            self.inputs.clone(),
            self.outputs.clone(),
        ))
    }

    /// Returns the metadata entries as raw byte payloads.
    pub fn metadata_bytes(&self) -> Result<BTreeMap<String, Vec<u8>>, ModelError> {
        self.metadata
            .iter()
            .map(|(tag, value)| {
                let bytes = match value {
                    serde_json::Value::String(s) => s.as_bytes().to_vec(),
                    other => serde_json::to_vec(other)?,
                };
                Ok((tag.clone(), bytes))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "tiny_kws",
        "tensors": [
            { "name": "input", "shape": [1, 4, 4, 1], "dtype": "int8" },
            { "name": "conv_w", "shape": [2, 3, 3, 1], "dtype": "int8", "constant": true },
            { "name": "conv_out", "shape": [1, 4, 4, 2], "dtype": "int8" },
            { "name": "logits", "shape": [1, 3], "dtype": "int8" },
            { "name": "fc_w", "shape": [3, 32], "dtype": "int8", "constant": true }
        ],
        "layers": [
            { "op": "CONV_2D", "inputs": [0, 1], "outputs": [2], "options": { "stride": 1 } },
            { "op": "FULLY_CONNECTED", "name": "classifier", "inputs": [2, 4], "outputs": [3] }
        ],
        "inputs": [0],
        "outputs": [3],
        "metadata": {
            "simulated_memory_spec": { "sizes": [4096] },
            "classes": "yes,no,unknown"
        }
    }"#;

    #[test]
    fn test_parse_and_build() {
        let m = ModelManifest::from_json(SAMPLE).unwrap();
        m.validate().unwrap();
        let g = m.to_graph().unwrap().validate().unwrap();
        assert_eq!(g.name, "tiny_kws");
        assert_eq!(g.num_layers(), 2);
        assert_eq!(g.layers[0].name, "op0-conv_2d");
        assert_eq!(g.layers[0].option_u64("stride"), Some(1));
        assert_eq!(g.layers[1].name, "classifier");
        assert_eq!(g.layers[1].op_code, OpCode::FullyConnected);
        assert!(g.tensors[1].constant);
    }

    #[test]
    fn test_metadata_bytes() {
        let m = ModelManifest::from_json(SAMPLE).unwrap();
        let meta = m.metadata_bytes().unwrap();
        assert_eq!(meta["classes"], b"yes,no,unknown".to_vec());
        let spec: serde_json::Value =
            serde_json::from_slice(&meta["simulated_memory_spec"]).unwrap();
        assert_eq!(spec["sizes"][0], 4096);
    }

    #[test]
    fn test_bad_dtype() {
        let json = SAMPLE.replace("\"dtype\": \"int8\" }", "\"dtype\": \"complex64\" }");
        let m = ModelManifest::from_json(&json).unwrap();
        assert!(matches!(
            m.validate(),
            Err(ModelError::InvalidTensor { .. })
        ));
    }

    #[test]
    fn test_no_layers() {
        let json = r#"{ "name": "x", "tensors": [], "layers": [], "inputs": [], "outputs": [] }"#;
        let m = ModelManifest::from_json(json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_duplicate_metadata_tag() {
        let json = r#"{
            "name": "x",
            "tensors": [{ "name": "a", "shape": [1], "dtype": "i8" }],
            "layers": [{ "op": "reshape", "inputs": [0], "outputs": [0] }],
            "inputs": [0], "outputs": [0],
            "metadata": { "Classes": "a", "classes": "b" }
        }"#;
        let m = ModelManifest::from_json(json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ModelManifest::from_json("{ not json"),
            Err(ModelError::ManifestParseError(_))
        ));
    }
}
