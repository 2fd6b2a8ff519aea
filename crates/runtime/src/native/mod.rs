// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The seam between the host layer and the inference engine.
//!
//! The engine is a singleton resource: one model at a time, driven
//! through [`NativeRuntime`]. A [`Context`](crate::Context) owns exactly
//! one engine behind its exclusive lock; sessions only ever reach it
//! through that lock.

mod reference;

pub use reference::{ReferenceRuntime, REFERENCE_API_VERSION};

use crate::accelerator::RegisteredAccelerator;
use crate::log_bridge::LogLevel;
use memory_manager::{AllocationEvent, LayerMemory, MemoryError};
use model_ir::ModelHandle;
use std::sync::Arc;

/// Receives raw `"<tag> <message>"` log lines from the engine.
pub type NativeLogger = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors reported by the engine.
#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    #[error("model parse error: {0}")]
    Parse(String),

    #[error("insufficient runtime buffer: model needs {required} bytes, {provided} provided")]
    InsufficientBuffer { required: usize, provided: usize },

    #[error("accelerator '{name}' (API version {version}) is not compatible with this engine")]
    IncompatibleAccelerator { name: String, version: u32 },

    #[error("no model is loaded")]
    NotLoaded,

    #[error("{kind} index {index} out of range (model has {count})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("input {index} expects {expected} bytes, got {actual}")]
    InputSize {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("layer {layer} kernel failed: {detail}")]
    Kernel { layer: usize, detail: String },

    #[error("arena error: {0}")]
    Memory(#[from] MemoryError),
}

/// Everything the engine needs to load one model.
#[derive(Debug, Clone)]
pub struct NativeLoadRequest<'a> {
    pub model: &'a ModelHandle,
    pub accelerator: Option<RegisteredAccelerator>,
    /// One size per arena. A size of 0 lets the engine size that arena.
    pub runtime_buffer_sizes: Vec<usize>,
    pub enable_profiler: bool,
    pub enable_recorder: bool,
    pub enable_tensor_recorder: bool,
    /// Place every planned activation buffer at the same offset.
    pub force_buffer_overlap: bool,
}

/// What the engine reports after a successful load.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelDetails {
    pub name: String,
    /// Variant name of the bound accelerator.
    pub accelerator: Option<String>,
    /// Bytes of arena 0 the model actually needs.
    pub runtime_memory_bytes: usize,
    /// Final arena sizes, auto-sized entries resolved.
    pub arena_sizes: Vec<usize>,
    pub layer_count: usize,
    pub input_count: usize,
    pub output_count: usize,
    /// Layers whose kernel the accelerator replaced.
    pub accelerated_layers: usize,
}

/// Called by the engine right after each layer executes.
pub trait LayerObserver {
    fn on_layer(&mut self, index: usize, outputs: &[Vec<u8>]);
}

impl<F: FnMut(usize, &[Vec<u8>])> LayerObserver for F {
    fn on_layer(&mut self, index: usize, outputs: &[Vec<u8>]) {
        self(index, outputs)
    }
}

/// Profiler counters for one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeLayerProfile {
    pub macs: u64,
    pub ops: u64,
    pub accelerator_cycles: u64,
    pub cpu_cycles: u64,
}

/// Recorder output for one layer.
#[derive(Debug, Clone, Default)]
pub struct NativeLayerRecord {
    /// Activation input bytes, in layer input order. Empty unless the
    /// tensor recorder is on.
    pub inputs: Vec<Vec<u8>>,
    /// Output bytes. Empty unless the tensor recorder is on.
    pub outputs: Vec<Vec<u8>>,
    pub accelerator_data: serde_json::Map<String, serde_json::Value>,
    pub memory: LayerMemory,
}

/// Recorder output for one pass.
#[derive(Debug, Clone, Default)]
pub struct NativeRecording {
    pub layers: Vec<NativeLayerRecord>,
    /// Arena allocation events, in allocation order.
    pub events: Vec<AllocationEvent>,
    /// Total persistent bytes of the whole model.
    pub total_persistent_bytes: usize,
}

/// The inference engine as the host layer sees it.
pub trait NativeRuntime: Send {
    /// Engine name, for diagnostics.
    fn name(&self) -> &str;

    /// API version accelerators must match.
    fn api_version(&self) -> u32;

    /// Source revision the engine was built from.
    fn git_hash(&self) -> &str;

    /// Installs (or removes) the log line callback.
    fn set_logger(&mut self, logger: Option<NativeLogger>);

    /// Sets the minimum emitted severity. Returns the previous level.
    fn set_log_level(&mut self, level: LogLevel) -> LogLevel;

    fn log_level(&self) -> LogLevel;

    /// Parses and allocates a model. Replaces any model still loaded.
    fn load(&mut self, request: NativeLoadRequest<'_>) -> Result<ModelDetails, NativeError>;

    fn is_loaded(&self) -> bool;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Copies raw bytes into input `index`.
    fn set_input(&mut self, index: usize, data: &[u8]) -> Result<(), NativeError>;

    /// Returns a copy of output `index`.
    fn output(&self, index: usize) -> Result<Vec<u8>, NativeError>;

    /// Runs one forward pass. Per-layer kernel failures are reported
    /// through [`layer_error`](Self::layer_error), not as an `Err`.
    fn invoke(&mut self, observer: &mut dyn LayerObserver) -> Result<(), NativeError>;

    /// Per-layer counters of the last pass. Empty unless profiling.
    fn profiling_results(&self) -> Vec<NativeLayerProfile>;

    /// Takes the recorder output of the last pass.
    fn recorded_data(&mut self) -> Option<NativeRecording>;

    /// Kernel error of layer `index` in the last pass.
    fn layer_error(&self, index: usize) -> Option<String>;

    /// Releases the loaded model.
    fn unload(&mut self) -> Result<(), NativeError>;
}
