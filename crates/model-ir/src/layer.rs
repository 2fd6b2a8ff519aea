// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer and tensor declarations of the model descriptor.
//!
//! A [`LayerDef`] references tensors by index into the graph's tensor
//! table; a [`TensorSpec`] carries the declared shape and dtype the
//! recorder needs to rebuild captured bytes.

use tensor_core::{DType, Shape};

/// The operation a layer performs.
///
/// Builtin kernels get their own variant; anything else (vendor or
/// user-registered kernels) is kept verbatim as [`OpCode::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpCode {
    Conv2d,
    DepthwiseConv2d,
    TransposeConv,
    FullyConnected,
    AveragePool2d,
    MaxPool2d,
    Add,
    Mul,
    Reshape,
    Softmax,
    Quantize,
    Dequantize,
    Concatenation,
    Pad,
    Mean,
    /// A kernel the descriptor does not know by name.
    Custom(String),
}

impl OpCode {
    /// Parses an op code from a descriptor string.
    ///
    /// Accepts snake_case (`"conv_2d"`), the flatbuffer enum spelling
    /// (`"CONV_2D"`), and a few common aliases (`"dense"`, `"dwconv"`).
    /// Unknown names become [`OpCode::Custom`].
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "conv_2d" | "conv2d" | "conv" => Self::Conv2d,
            "depthwise_conv_2d" | "depthwise_conv2d" | "dwconv" => Self::DepthwiseConv2d,
            "transpose_conv" | "deconv" => Self::TransposeConv,
            "fully_connected" | "dense" | "fc" => Self::FullyConnected,
            "average_pool_2d" | "avg_pool" | "avgpool" => Self::AveragePool2d,
            "max_pool_2d" | "max_pool" | "maxpool" => Self::MaxPool2d,
            "add" => Self::Add,
            "mul" => Self::Mul,
            "reshape" => Self::Reshape,
            "softmax" => Self::Softmax,
            "quantize" => Self::Quantize,
            "dequantize" => Self::Dequantize,
            "concatenation" | "concat" => Self::Concatenation,
            "pad" => Self::Pad,
            "mean" => Self::Mean,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Returns the canonical snake_case label.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Conv2d => "conv_2d",
            Self::DepthwiseConv2d => "depthwise_conv_2d",
            Self::TransposeConv => "transpose_conv",
            Self::FullyConnected => "fully_connected",
            Self::AveragePool2d => "average_pool_2d",
            Self::MaxPool2d => "max_pool_2d",
            Self::Add => "add",
            Self::Mul => "mul",
            Self::Reshape => "reshape",
            Self::Softmax => "softmax",
            Self::Quantize => "quantize",
            Self::Dequantize => "dequantize",
            Self::Concatenation => "concatenation",
            Self::Pad => "pad",
            Self::Mean => "mean",
            Self::Custom(name) => name,
        }
    }

    /// Returns `true` for builtin kernels.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<String> for OpCode {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<OpCode> for String {
    fn from(op: OpCode) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared metadata of one tensor in the graph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorSpec {
    /// Position in the graph's tensor table.
    pub index: usize,
    /// Tensor name as stored in the flatbuffer.
    pub name: String,
    /// Declared shape.
    pub shape: Shape,
    /// Declared element type.
    pub dtype: DType,
    /// `true` for weights/biases baked into the flatbuffer. Constant
    /// tensors never occupy the runtime arena.
    pub constant: bool,
}

impl TensorSpec {
    /// Bytes required to hold this tensor.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }
}

/// Metadata describing a single layer (operator) of the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LayerDef {
    /// Index in the execution order (0-based).
    pub index: usize,
    /// Display name, e.g. `"op3-conv_2d"`.
    pub name: String,
    /// The operation this layer performs.
    pub op_code: OpCode,
    /// Input tensor indices into the graph's tensor table.
    pub inputs: Vec<usize>,
    /// Output tensor indices into the graph's tensor table.
    pub outputs: Vec<usize>,
    /// Free-form per-op configuration (strides, activation, kernel hints).
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl LayerDef {
    /// Returns a numeric option, if present and non-negative.
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }

    /// Returns a string option, if present.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Returns a concise summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} ({}) inputs={:?} outputs={:?}",
            self.index, self.name, self.op_code, self.inputs, self.outputs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer(index: usize, op_code: OpCode) -> LayerDef {
        let mut options = serde_json::Map::new();
        options.insert("stride".into(), serde_json::json!(2));
        options.insert("activation".into(), serde_json::json!("relu"));
        LayerDef {
            index,
            name: format!("op{index}-{op_code}"),
            op_code,
            inputs: vec![0, 1],
            outputs: vec![2],
            options,
        }
    }

    #[test]
    fn test_op_code_parse() {
        assert_eq!(OpCode::parse("CONV_2D"), OpCode::Conv2d);
        assert_eq!(OpCode::parse("dense"), OpCode::FullyConnected);
        assert_eq!(OpCode::parse("dwconv"), OpCode::DepthwiseConv2d);
        assert_eq!(OpCode::parse("max_pool"), OpCode::MaxPool2d);
        assert_eq!(
            OpCode::parse("VendorOp"),
            OpCode::Custom("VendorOp".into())
        );
    }

    #[test]
    fn test_op_code_display() {
        assert_eq!(format!("{}", OpCode::DepthwiseConv2d), "depthwise_conv_2d");
        assert_eq!(format!("{}", OpCode::Custom("my_op".into())), "my_op");
        assert!(!OpCode::Custom("x".into()).is_builtin());
        assert!(OpCode::Add.is_builtin());
    }

    #[test]
    fn test_options() {
        let layer = sample_layer(3, OpCode::Conv2d);
        assert_eq!(layer.option_u64("stride"), Some(2));
        assert_eq!(layer.option_str("activation"), Some("relu"));
        assert_eq!(layer.option_u64("missing"), None);
    }

    #[test]
    fn test_summary() {
        let layer = sample_layer(3, OpCode::Conv2d);
        let s = layer.summary();
        assert!(s.contains("[3]"));
        assert!(s.contains("conv_2d"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let layer = sample_layer(0, OpCode::Custom("vendor_fft".into()));
        let json = serde_json::to_string(&layer).unwrap();
        assert!(json.contains("\"vendor_fft\""));
        let back: LayerDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op_code, layer.op_code);
        assert_eq!(back.outputs, layer.outputs);
    }

    #[test]
    fn test_tensor_size() {
        let t = TensorSpec {
            index: 0,
            name: "input".into(),
            shape: Shape::new(vec![1, 49, 40, 1]),
            dtype: DType::I8,
            constant: false,
        };
        assert_eq!(t.size_bytes(), 1960);
    }
}
