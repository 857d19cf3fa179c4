//! Element types carried over the collective channel.
//!
//! Discriminant values are stable and part of the wire contract; backends
//! may ship them across processes, so they must never be renumbered.

use crate::error::{Error, Result};
use std::fmt;

/// Element type of a [`Tensor`](crate::tensor::Tensor) buffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F64 = 0,
    F32 = 1,
    I64 = 10,
    I32 = 11,
    U32 = 21,
    U8 = 23,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::U8 => 1,
        }
    }

    /// Recover a dtype from its stable discriminant.
    pub fn from_discriminant(val: u8) -> Result<DType> {
        match val {
            0 => Ok(DType::F64),
            1 => Ok(DType::F32),
            10 => Ok(DType::I64),
            11 => Ok(DType::I32),
            21 => Ok(DType::U32),
            23 => Ok(DType::U8),
            _ => Err(Error::Comm {
                reason: format!("unknown dtype discriminant {val}"),
            }),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F64 => "f64",
            DType::F32 => "f32",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::U8 => "u8",
        };
        write!(f, "{name}")
    }
}

/// Rust scalar types that can back a tensor buffer.
///
/// Sealed to the primitives with a matching [`DType`].
pub trait Element: bytemuck::Pod + private::Sealed {
    /// The dtype tag for this element type.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl private::Sealed for $ty {}
        impl Element for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

impl_element!(f64, DType::F64);
impl_element!(f32, DType::F32);
impl_element!(i64, DType::I64);
impl_element!(i32, DType::I32);
impl_element!(u32, DType::U32);
impl_element!(u8, DType::U8);

mod private {
    pub trait Sealed {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminant_roundtrip() {
        let dtypes = [
            DType::F64,
            DType::F32,
            DType::I64,
            DType::I32,
            DType::U32,
            DType::U8,
        ];
        for &dt in &dtypes {
            let id = dt as u8;
            let back = DType::from_discriminant(id).unwrap();
            assert_eq!(dt, back);
        }
    }

    #[test]
    fn test_from_discriminant_invalid() {
        assert!(DType::from_discriminant(99).is_err());
    }

    #[test]
    fn test_size_bytes() {
        assert_eq!(DType::F64.size_bytes(), 8);
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::U8.size_bytes(), 1);
    }
}
