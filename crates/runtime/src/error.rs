// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime host layer.

use crate::session::SessionState;
use tensor_core::{DType, Shape};

/// Errors raised by the context, registry, sessions, and the profiler.
///
/// Per-layer kernel failures are not errors at this level; they are
/// reported through [`LayerResult::error_msg`](crate::LayerResult).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// An accelerator was built against a different runtime API.
    #[error("accelerator '{accelerator}' has API version {accelerator_version}, but the runtime reports {runtime_version}")]
    VersionMismatch {
        accelerator: String,
        accelerator_version: u32,
        runtime_version: u32,
    },

    /// A variant name is already taken.
    #[error("accelerator variant '{variant}' is already registered")]
    DuplicateVariant { variant: String },

    /// No accelerator is registered under the requested name.
    #[error("unknown accelerator '{name}'; known accelerators: [{}]", .known.join(", "))]
    UnknownAccelerator { name: String, known: Vec<String> },

    /// The native engine could not load the model.
    #[error("failed to load model: {0}")]
    LoadError(String),

    /// The operation is not valid in the session's current state.
    #[error("cannot {op} while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// An input tensor does not match the model's declaration.
    #[error("input {index} expects {expected_shape} {expected_dtype}, got {actual_shape} {actual_dtype}")]
    ShapeMismatch {
        index: usize,
        expected_shape: Shape,
        expected_dtype: DType,
        actual_shape: Shape,
        actual_dtype: DType,
    },

    /// The native engine failed in a way that aborted the invocation.
    #[error("invocation failed: {0}")]
    InvocationError(String),

    /// Another session currently holds the native engine.
    #[error("a model is already loaded; unload it before loading another")]
    SessionBusy,

    /// An input/output index is out of range.
    #[error("{kind} index {index} out of range (model has {count})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    /// Profiling/recording options are inconsistent.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Teardown reported errors. The engine lock has been released.
    #[error("unload reported errors: {0}")]
    Teardown(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Model descriptor error.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// Arena or memory plan error.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// Recorded tensor could not be reconstructed.
    #[error("tensor error: {0}")]
    TensorError(#[from] tensor_core::TensorError),
}
