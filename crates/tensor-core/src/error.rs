// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor construction and access.

/// Errors that can occur when building or reading tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("shape mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// A recorded buffer is not a whole number of elements.
    #[error("buffer of {len} bytes is not a multiple of the {dtype} element size")]
    MisalignedBuffer { len: usize, dtype: crate::DType },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype:?} for operation {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },
}
