// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element data types of model tensors.

/// Enumerates the element types a model tensor can declare.
///
/// The set mirrors what micro-controller models actually carry: mostly
/// quantised integers, with float tensors at the model boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 16-bit IEEE 754 floating point (stored as raw bits).
    F16,
    /// 8-bit signed integer (the common quantised activation type).
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer (biases, shapes).
    I32,
    /// 64-bit signed integer.
    I64,
    /// Boolean stored as one byte.
    Bool,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::I16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
            DType::I64 => 8,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F16 => "float16",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
        }
    }

    /// Parses a dtype from a descriptor string.
    ///
    /// Accepts both the long numpy-style names (`"int8"`, `"float32"`) and
    /// the short forms (`"i8"`, `"f32"`). Case-insensitive.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" | "float" => Some(Self::F32),
            "float16" | "f16" | "half" => Some(Self::F16),
            "int8" | "i8" => Some(Self::I8),
            "uint8" | "u8" => Some(Self::U8),
            "int16" | "i16" => Some(Self::I16),
            "int32" | "i32" => Some(Self::I32),
            "int64" | "i64" => Some(Self::I64),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_bytes() {
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::I16.size_bytes(), 2);
        assert_eq!(DType::I8.size_bytes(), 1);
        assert_eq!(DType::I64.size_bytes(), 8);
    }

    #[test]
    fn test_from_str_loose() {
        assert_eq!(DType::from_str_loose("INT8"), Some(DType::I8));
        assert_eq!(DType::from_str_loose("f32"), Some(DType::F32));
        assert_eq!(DType::from_str_loose("uint8"), Some(DType::U8));
        assert_eq!(DType::from_str_loose("complex64"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&DType::I8).unwrap();
        assert_eq!(json, "\"i8\"");
        let back: DType = serde_json::from_str("\"f32\"").unwrap();
        assert_eq!(back, DType::F32);
    }
}
