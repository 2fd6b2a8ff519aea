// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Owned tensor buffers and typed element access.

use crate::{DType, Shape, TensorError};

/// A primitive type that can be stored in a [`Tensor`].
///
/// Elements are always encoded little-endian, matching the byte order the
/// inference engine records on every supported target.
pub trait Element: Copy {
    /// The dtype this element type corresponds to.
    const DTYPE: DType;

    /// Decodes one element from exactly `DTYPE.size_bytes()` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Appends the little-endian encoding of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(f32, DType::F32);
impl_element!(i8, DType::I8);
impl_element!(u8, DType::U8);
impl_element!(i16, DType::I16);
impl_element!(i32, DType::I32);
impl_element!(i64, DType::I64);

/// An owned, n-dimensional tensor stored as a contiguous byte buffer.
///
/// Data is stored in row-major (C) order. Typed access goes through
/// [`Tensor::values`], which decodes little-endian elements without
/// requiring the byte buffer to be aligned.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.size_bytes(), 24);
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let size = shape.size_bytes(dtype);
        Self {
            shape,
            dtype,
            data: vec![0u8; size],
        }
    }

    /// Creates a tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// Creates a tensor from typed values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_values(Shape::vector(3), &[1i8, -2, 3]).unwrap();
    /// assert_eq!(t.values::<i8>().unwrap(), vec![1, -2, 3]);
    /// ```
    pub fn from_values<T: Element>(shape: Shape, values: &[T]) -> Result<Self, TensorError> {
        let expected_elements = shape.num_elements();
        if values.len() != expected_elements {
            return Err(TensorError::BufferSizeMismatch {
                expected: expected_elements * T::DTYPE.size_bytes(),
                actual: values.len() * T::DTYPE.size_bytes(),
            });
        }
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size_bytes());
        for v in values {
            v.write_le(&mut data);
        }
        Ok(Self {
            shape,
            dtype: T::DTYPE,
            data,
        })
    }

    /// Rebuilds a tensor from bytes captured by the recorder.
    ///
    /// The bytes are reinterpreted as `dtype` elements. When the declared
    /// shape has a non-zero element count the result takes that shape and
    /// the byte length must match it exactly. When the declared shape has
    /// zero elements the result stays flat: a 1-D tensor holding every
    /// recorded element.
    pub fn from_recorded(
        declared: &Shape,
        dtype: DType,
        bytes: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let element_size = dtype.size_bytes();
        if bytes.len() % element_size != 0 {
            return Err(TensorError::MisalignedBuffer {
                len: bytes.len(),
                dtype,
            });
        }

        if declared.is_empty() {
            return Ok(Self {
                shape: Shape::vector(bytes.len() / element_size),
                dtype,
                data: bytes,
            });
        }

        Self::from_bytes(declared.clone(), dtype, bytes)
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the raw byte slice backing this tensor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns a mutable reference to the raw byte buffer.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consumes the tensor and returns its byte buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Returns the memory footprint of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Decodes the buffer into typed values.
    ///
    /// Fails with [`TensorError::UnsupportedDType`] when `T` does not match
    /// the tensor's dtype.
    pub fn values<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::UnsupportedDType {
                op: "values",
                dtype: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size_bytes())
            .map(T::from_le_slice)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert_eq!(t.size_bytes(), 24);
        assert_eq!(t.shape(), &Shape::matrix(2, 3));
        assert!(t.values::<f32>().unwrap().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_values_f32() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = Tensor::from_values(Shape::matrix(2, 3), &data).unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.values::<f32>().unwrap(), data);
    }

    #[test]
    fn test_from_values_count_mismatch() {
        let result = Tensor::from_values(Shape::vector(4), &[1i8, 2]);
        assert!(matches!(result, Err(TensorError::BufferSizeMismatch { .. })));
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = Tensor::from_bytes(Shape::matrix(2, 3), DType::F32, vec![0u8; 10]);
        assert!(result.is_err());
    }

    #[test]
    fn test_values_wrong_dtype() {
        let t = Tensor::zeros(Shape::vector(4), DType::I8);
        assert!(matches!(
            t.values::<f32>(),
            Err(TensorError::UnsupportedDType { .. })
        ));
    }

    #[test]
    fn test_recorded_keeps_declared_shape() {
        let declared = Shape::new(vec![1, 2, 2]);
        let bytes: Vec<u8> = [1i16, -1, 300, 7]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let t = Tensor::from_recorded(&declared, DType::I16, bytes).unwrap();
        assert_eq!(t.shape(), &declared);
        assert_eq!(t.values::<i16>().unwrap(), vec![1, -1, 300, 7]);
    }

    #[test]
    fn test_recorded_zero_element_shape_stays_flat() {
        let declared = Shape::new(vec![0, 4]);
        let bytes: Vec<u8> = [0.5f32, 1.5, 2.5]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let t = Tensor::from_recorded(&declared, DType::F32, bytes.clone()).unwrap();
        assert_eq!(t.shape(), &Shape::vector(3));
        assert_eq!(t.as_bytes(), &bytes[..]);
        assert_eq!(t.values::<f32>().unwrap(), vec![0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_recorded_length_mismatch() {
        let declared = Shape::vector(8);
        let err = Tensor::from_recorded(&declared, DType::I8, vec![0; 6]).unwrap_err();
        assert!(matches!(
            err,
            TensorError::BufferSizeMismatch { expected: 8, actual: 6 }
        ));
    }

    #[test]
    fn test_recorded_misaligned() {
        let err = Tensor::from_recorded(&Shape::vector(0), DType::I32, vec![0; 6]).unwrap_err();
        assert!(matches!(err, TensorError::MisalignedBuffer { len: 6, .. }));
    }

    #[test]
    fn test_into_bytes() {
        let t = Tensor::from_values(Shape::vector(2), &[1u8, 2]).unwrap();
        assert_eq!(t.into_bytes(), vec![1, 2]);
    }
}
