// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor descriptors shared by the model descriptor, the inference engine
//! seam, and the profiler/recorder.
//!
//! This crate provides:
//! - [`Tensor`]: an owned, n-dimensional byte buffer with a declared dtype.
//! - [`Shape`]: runtime shape descriptors.
//! - [`DType`]: the element types a micro-controller model declares.
//! - [`Element`]: typed little-endian access to tensor contents.
//!
//! Recorded tensors arrive from the engine as raw bytes; use
//! [`Tensor::from_recorded`] to turn them back into shaped tensors.

mod dtype;
mod error;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::{Element, Tensor};
