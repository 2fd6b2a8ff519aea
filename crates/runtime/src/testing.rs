// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model fixtures shared by the unit tests.

use model_ir::{FlatbufferData, LayerDef, ModelGraph, ModelHandle, OpCode, TensorSpec};
use std::collections::BTreeMap;
use tensor_core::{DType, Shape};

/// A minimal buffer carrying the TFL3 file identifier.
pub(crate) fn tflite_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; 32];
    bytes[4..8].copy_from_slice(model_ir::TFLITE_FILE_IDENTIFIER);
    bytes
}

fn tensor(index: usize, name: &str, dims: Vec<usize>, constant: bool) -> TensorSpec {
    TensorSpec {
        index,
        name: name.into(),
        shape: Shape::new(dims),
        dtype: DType::I8,
        constant,
    }
}

fn layer(index: usize, op_code: OpCode, inputs: Vec<usize>, outputs: Vec<usize>) -> LayerDef {
    LayerDef {
        index,
        name: format!("op{index}-{op_code}"),
        op_code,
        inputs,
        outputs,
        options: serde_json::Map::new(),
    }
}

fn kws_graph() -> ModelGraph<model_ir::graph::Validated> {
    ModelGraph::new(
        "tiny_kws".into(),
        vec![
            tensor(0, "input", vec![1, 4, 4, 1], false),
            tensor(1, "conv_w", vec![2, 3, 3, 1], true),
            tensor(2, "conv_out", vec![1, 4, 4, 2], false),
            tensor(3, "logits", vec![1, 3], false),
            tensor(4, "fc_w", vec![3, 32], true),
        ],
        vec![
            layer(0, OpCode::Conv2d, vec![0, 1], vec![2]),
            layer(1, OpCode::FullyConnected, vec![2, 4], vec![3]),
        ],
        vec![0],
        vec![3],
    )
    .validate()
    .unwrap()
}

/// Conv + fully-connected model with a 16-byte int8 input and 3 outputs.
pub(crate) fn kws_model() -> ModelHandle {
    model_with_bytes(tflite_bytes())
}

/// The kws model with arbitrary flatbuffer bytes.
pub(crate) fn model_with_bytes(bytes: Vec<u8>) -> ModelHandle {
    ModelHandle::new(kws_graph(), FlatbufferData::Owned(bytes), BTreeMap::new()).unwrap()
}

/// The kws model carrying a `<accelerator>_memory_spec` metadata entry.
pub(crate) fn kws_model_with_memory_spec(accelerator: &str, sizes: &[usize]) -> ModelHandle {
    let spec = serde_json::json!({ "sizes": sizes });
    let metadata = BTreeMap::from([(
        format!("{accelerator}_memory_spec"),
        serde_json::to_vec(&spec).unwrap(),
    )]);
    ModelHandle::new(kws_graph(), FlatbufferData::Owned(tflite_bytes()), metadata).unwrap()
}

/// A chain of `layers` reshapes over `[4]` int8 tensors. `custom` swaps
/// the op at one position for an op the engine has no kernel for.
pub(crate) fn chain_model(layers: usize, custom: Option<(usize, &str)>) -> ModelHandle {
    let tensors = (0..=layers)
        .map(|i| tensor(i, &format!("t{i}"), vec![4], false))
        .collect();
    let defs = (0..layers)
        .map(|i| {
            let op = match custom {
                Some((at, name)) if at == i => OpCode::Custom(name.to_string()),
                _ => OpCode::Reshape,
            };
            layer(i, op, vec![i], vec![i + 1])
        })
        .collect();
    let graph = ModelGraph::new("chain".into(), tensors, defs, vec![0], vec![layers])
        .validate()
        .unwrap();
    ModelHandle::new(graph, FlatbufferData::Owned(tflite_bytes()), BTreeMap::new()).unwrap()
}
