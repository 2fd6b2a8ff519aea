// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tflm-runtime
//!
//! Host-side orchestration around a single-instance TFLM-style inference
//! engine: loading models, binding accelerators, profiling and recording.
//!
//! The runtime takes:
//! - A [`ModelHandle`](model_ir::ModelHandle) from `model-ir` (flatbuffer
//!   bytes plus a validated graph and metadata).
//! - A [`NativeRuntime`] implementation; [`ReferenceRuntime`] is the
//!   built-in software engine.
//! - Any number of [`Accelerator`] backends, registered by hand or found
//!   through plugin discovery.
//!
//! # Session lifecycle
//! ```text
//! Context::load ─► Session (Loaded) ─► invoke* ─► unload
//!        │                                          │
//!        └──────── engine lock held ────────────────┘
//! ```
//! Only one session per [`Context`] exists at a time. A second `load`
//! blocks until the first session is unloaded or dropped.
//!
//! # Example
//! ```
//! use tflm_runtime::{Context, RuntimeConfig, ProfileOptions};
//! # fn model() -> model_ir::ModelHandle {
//! #     let manifest = r#"{"name": "tiny", "tensors": [
//! #         {"name": "x", "shape": [4], "dtype": "int8"},
//! #         {"name": "y", "shape": [4], "dtype": "int8"}],
//! #       "layers": [{"op": "RESHAPE", "inputs": [0], "outputs": [1]}],
//! #       "inputs": [0], "outputs": [1]}"#;
//! #     let mut fb = vec![0u8; 16];
//! #     fb[4..8].copy_from_slice(b"TFL3");
//! #     let manifest = model_ir::ModelManifest::from_json(manifest).unwrap();
//! #     model_ir::ModelLoader::from_manifest_and_flatbuffer(&manifest, model_ir::FlatbufferData::Owned(fb))
//! #         .unwrap()
//! # }
//!
//! let context = Context::with_reference_runtime(RuntimeConfig::default()).unwrap();
//! let result = context.profile_model(&model(), ProfileOptions::default()).unwrap();
//! assert_eq!(result.layers.len(), 1);
//! ```

pub mod accelerator;
mod config;
mod context;
mod error;
mod log_bridge;
mod metrics;
pub mod native;
mod profiler;
mod recorder;
mod session;

#[cfg(test)]
mod testing;

pub use accelerator::{
    Accelerator, AcceleratorFactories, AcceleratorHooks, AcceleratorRegistry, DiscoveryReport,
    HookError, PlaceholderAccelerator, RegisteredAccelerator, SimulatedAccelerator,
    SimulatedConfig, PLACEHOLDER_ACCELERATOR,
};
pub use config::RuntimeConfig;
pub use context::Context;
pub use error::RuntimeError;
pub use log_bridge::{LogBridge, LogLevel, LogSink, TracingSink};
pub use metrics::{LayerCallback, LayerResult, LayerSnapshot, ProfilingResult};
pub use native::{ModelDetails, NativeRuntime, ReferenceRuntime, REFERENCE_API_VERSION};
pub use profiler::ProfileOptions;
pub use recorder::{RecordOptions, Recording};
pub use session::{LoadOptions, Session, SessionState};
