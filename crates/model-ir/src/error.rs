// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model loading and descriptor construction.

/// Errors that can occur when working with model descriptors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A model file could not be read.
    #[error("failed to read model file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// The flatbuffer payload could not be mapped or is empty.
    #[error("invalid flatbuffer '{path}': {detail}")]
    FlatbufferError { path: String, detail: String },

    /// A layer definition is invalid (e.g., dangling tensor reference).
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// A tensor declaration is invalid.
    #[error("invalid tensor '{tensor}': {detail}")]
    InvalidTensor { tensor: String, detail: String },

    /// The model graph is empty or otherwise malformed.
    #[error("invalid model graph: {0}")]
    InvalidGraph(String),
}
