// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model graph: the operator list and tensor table of one subgraph.
//!
//! # Type-State Pattern
//!
//! ```text
//! ModelGraph<Loaded>    : layers and tensors parsed, not yet checked.
//!       │  .validate()
//!       ▼
//! ModelGraph<Validated> : references checked, ready to hand to a runtime.
//! ```
//!
//! Only a validated graph can be wrapped in a
//! [`ModelHandle`](crate::ModelHandle), so the runtime never sees dangling
//! tensor indices.

use crate::{LayerDef, ModelError, TensorSpec};
use std::fmt;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been loaded but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── ModelGraph ─────────────────────────────────────────────────────

/// Operators in execution order plus the tensor table they reference.
#[derive(Debug, Clone)]
pub struct ModelGraph<S: GraphState = Loaded> {
    /// Human-readable model name (e.g., `"keyword_spotting"`).
    pub name: String,
    /// Tensor table, indexed by [`TensorSpec::index`].
    pub tensors: Vec<TensorSpec>,
    /// Ordered list of layer definitions.
    pub layers: Vec<LayerDef>,
    /// Indices of the model's input tensors.
    pub inputs: Vec<usize>,
    /// Indices of the model's output tensors.
    pub outputs: Vec<usize>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl ModelGraph<Loaded> {
    /// Creates a new graph in the `Loaded` state.
    pub fn new(
        name: String,
        tensors: Vec<TensorSpec>,
        layers: Vec<LayerDef>,
        inputs: Vec<usize>,
        outputs: Vec<usize>,
    ) -> Self {
        Self {
            name,
            tensors,
            layers,
            inputs,
            outputs,
            _state: std::marker::PhantomData,
        }
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph has at least one layer, one input and one output.
    /// - Tensor and layer indices are consecutive starting from 0.
    /// - Every tensor reference is in range.
    /// - Model inputs are not constant tensors.
    /// - Every non-constant layer input is a model input or the output of
    ///   an earlier layer.
    pub fn validate(self) -> Result<ModelGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph(
                "model graph contains no layers".into(),
            ));
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ModelError::InvalidGraph(
                "model must declare at least one input and one output".into(),
            ));
        }

        for (i, tensor) in self.tensors.iter().enumerate() {
            if tensor.index != i {
                return Err(ModelError::InvalidTensor {
                    tensor: tensor.name.clone(),
                    detail: format!("expected index {i}, got {}", tensor.index),
                });
            }
        }

        let count = self.tensors.len();
        for &idx in self.inputs.iter().chain(&self.outputs) {
            if idx >= count {
                return Err(ModelError::InvalidGraph(format!(
                    "model io references tensor {idx}, but only {count} tensors exist"
                )));
            }
        }
        for &idx in &self.inputs {
            if self.tensors[idx].constant {
                return Err(ModelError::InvalidTensor {
                    tensor: self.tensors[idx].name.clone(),
                    detail: "model input cannot be a constant tensor".into(),
                });
            }
        }

        let mut produced = vec![false; count];
        for &idx in &self.inputs {
            produced[idx] = true;
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.index != i {
                return Err(ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: format!("expected index {i}, got {}", layer.index),
                });
            }
            if layer.outputs.is_empty() {
                return Err(ModelError::InvalidLayer {
                    layer: layer.name.clone(),
                    detail: "layer produces no outputs".into(),
                });
            }
            for &idx in layer.inputs.iter().chain(&layer.outputs) {
                if idx >= count {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: format!("tensor {idx} out of range ({count} tensors)"),
                    });
                }
            }
            for &idx in &layer.inputs {
                if !self.tensors[idx].constant && !produced[idx] {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.name.clone(),
                        detail: format!(
                            "input tensor '{}' is read before it is produced",
                            self.tensors[idx].name
                        ),
                    });
                }
            }
            for &idx in &layer.outputs {
                produced[idx] = true;
            }
        }

        for &idx in &self.outputs {
            if !produced[idx] {
                tracing::warn!(
                    "model output '{}' is never written by any layer",
                    self.tensors[idx].name
                );
            }
        }

        Ok(ModelGraph {
            name: self.name,
            tensors: self.tensors,
            layers: self.layers,
            inputs: self.inputs,
            outputs: self.outputs,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl ModelGraph<Validated> {
    /// Returns the total number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Returns an iterator over the layers in execution order.
    pub fn iter_layers(&self) -> impl Iterator<Item = &LayerDef> {
        self.layers.iter()
    }

    /// Returns a reference to a layer by index.
    pub fn layer(&self, index: usize) -> Option<&LayerDef> {
        self.layers.get(index)
    }

    /// Returns a reference to a tensor by index.
    pub fn tensor(&self, index: usize) -> Option<&TensorSpec> {
        self.tensors.get(index)
    }

    /// Returns the declared specs of the model inputs, in order.
    pub fn input_specs(&self) -> impl Iterator<Item = &TensorSpec> {
        self.inputs.iter().map(|&i| &self.tensors[i])
    }

    /// Returns the declared specs of the model outputs, in order.
    pub fn output_specs(&self) -> impl Iterator<Item = &TensorSpec> {
        self.outputs.iter().map(|&i| &self.tensors[i])
    }

    /// Total bytes of constant (flatbuffer-resident) tensors.
    pub fn total_constant_bytes(&self) -> usize {
        self.tensors
            .iter()
            .filter(|t| t.constant)
            .map(|t| t.size_bytes())
            .sum()
    }

    /// Total bytes of non-constant tensors, before any lifetime sharing.
    pub fn total_activation_bytes(&self) -> usize {
        self.tensors
            .iter()
            .filter(|t| !t.constant)
            .map(|t| t.size_bytes())
            .sum()
    }

    /// Returns the `(first, last)` layer indices during which each
    /// non-constant tensor must stay resident.
    ///
    /// Model inputs are live from layer 0; model outputs stay live through
    /// the final layer. Tensors no layer touches are omitted.
    pub fn tensor_lifetimes(&self) -> Vec<(usize, usize, usize)> {
        let last_layer = self.layers.len() - 1;
        let mut spans: Vec<Option<(usize, usize)>> = vec![None; self.tensors.len()];

        let mut touch = |idx: usize, at: usize| {
            let span = spans[idx].get_or_insert((at, at));
            span.0 = span.0.min(at);
            span.1 = span.1.max(at);
        };
        for &idx in &self.inputs {
            touch(idx, 0);
        }
        for layer in &self.layers {
            for &idx in layer.inputs.iter().chain(&layer.outputs) {
                touch(idx, layer.index);
            }
        }
        for &idx in &self.outputs {
            touch(idx, last_layer);
        }

        spans
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !self.tensors[*idx].constant)
            .filter_map(|(idx, span)| span.map(|(first, last)| (idx, first, last)))
            .collect()
    }

    /// Returns a summary string describing the model.
    pub fn summary(&self) -> String {
        format!(
            "Model '{}': {} layers, {} tensors, {:.1} KB constants, {:.1} KB activations",
            self.name,
            self.num_layers(),
            self.tensors.len(),
            self.total_constant_bytes() as f64 / 1024.0,
            self.total_activation_bytes() as f64 / 1024.0,
        )
    }
}
