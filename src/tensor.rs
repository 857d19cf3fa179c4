//! Host-memory staging tensors.
//!
//! The collective layer moves contiguous, dtype-tagged byte buffers in place.
//! `Tensor` is that buffer: always contiguous, always host-resident. A device
//! runtime stays behind the [`Collective`](crate::comm::Collective) contract;
//! callers copy into staging tensors before synchronization and back out after.

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};

/// Contiguous host tensor with a dtype tag and shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor from a typed slice.
    ///
    /// # Panics
    ///
    /// Panics if `shape` does not describe exactly `values.len()` elements.
    pub fn from_slice<T: Element>(values: &[T], shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            numel,
            values.len(),
            "shape {shape:?} does not match {} elements",
            values.len()
        );
        Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    /// Create a zero-filled tensor.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            dtype,
            shape: shape.to_vec(),
            data: vec![0u8; numel * dtype.size_bytes()],
        }
    }

    /// Zero-filled tensor with the same shape and dtype as `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shape, self.dtype)
    }

    /// Create a 1-D byte tensor owning `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            dtype: DType::U8,
            shape: vec![bytes.len()],
            data: bytes,
        }
    }

    /// Wrap a single scalar in a one-element tensor.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_slice(&[value], &[1])
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total buffer size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Raw storage bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw storage bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Address of the first storage byte, for the raw collective contract.
    pub fn data_ptr(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    /// Copy the elements out as a typed vector.
    ///
    /// # Errors
    ///
    /// Returns `DTypeMismatch` if `T` does not match the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.dtype != T::DTYPE {
            return Err(Error::DTypeMismatch {
                expected: T::DTYPE,
                got: self.dtype,
            });
        }
        // Storage is Vec<u8>, so go through a copying cast to avoid
        // alignment requirements on the source.
        Ok(bytemuck::pod_collect_to_vec(&self.data))
    }

    /// Read the single element of a one-element tensor.
    pub fn item<T: Element>(&self) -> Result<T> {
        if self.numel() != 1 {
            return Err(Error::InvalidArgument {
                arg: "tensor",
                reason: format!("item() requires one element, tensor has {}", self.numel()),
            });
        }
        Ok(self.to_vec::<T>()?[0])
    }

    /// Overwrite the buffer from a typed slice of the same dtype and length.
    pub fn copy_from_slice<T: Element>(&mut self, values: &[T]) -> Result<()> {
        if self.dtype != T::DTYPE {
            return Err(Error::DTypeMismatch {
                expected: T::DTYPE,
                got: self.dtype,
            });
        }
        if values.len() != self.numel() {
            return Err(Error::InvalidArgument {
                arg: "values",
                reason: format!(
                    "expected {} elements, got {}",
                    self.numel(),
                    values.len()
                ),
            });
        }
        self.data.copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }
}
