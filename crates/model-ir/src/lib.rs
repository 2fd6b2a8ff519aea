// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The model descriptor consumed by the runtime host layer.
//!
//! The runtime never parses flatbuffers itself; it only needs a handful of
//! facts about a model, which this crate captures:
//!
//! - [`OpCode`]: the operation each layer performs.
//! - [`LayerDef`] / [`TensorSpec`]: the operator list and tensor table.
//! - [`ModelGraph`]: the subgraph, with a **type-state pattern**
//!   (`Loaded` → `Validated`).
//! - [`ModelHandle`]: the shareable descriptor: validated graph, the
//!   serialized flatbuffer, and named metadata (including per-accelerator
//!   [`MemorySpec`] entries).
//! - [`ModelLoader`]: loads a model from a JSON manifest + `.tflite` file.
//!
//! # Example
//! ```no_run
//! use model_ir::ModelLoader;
//! use std::path::Path;
//!
//! let model = ModelLoader::load(Path::new("./models/kws")).unwrap();
//! println!("{}", model.graph().summary());
//! for layer in model.graph().iter_layers() {
//!     println!("  {}", layer.summary());
//! }
//! ```

mod error;
pub mod graph;
mod handle;
mod layer;
mod loader;
mod manifest;

pub use error::ModelError;
pub use graph::ModelGraph;
pub use handle::{FlatbufferData, MemorySpec, ModelHandle, TFLITE_FILE_IDENTIFIER};
pub use layer::{LayerDef, OpCode, TensorSpec};
pub use loader::ModelLoader;
pub use manifest::{ManifestLayer, ManifestTensor, ModelManifest};
