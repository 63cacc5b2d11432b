use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use super::storage::{DeviceMemory, Storage};
use crate::error::{Error, Result};

/// Element type tag carried by every tensor.
/// Closed set: kernels are specialized once per call by matching on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    I8,
    I32,
    BF16,
    F16,
    F32,
    F64,
}

impl DType {
    pub const ALL: &'static [DType] = &[
        DType::U8,
        DType::I8,
        DType::I32,
        DType::BF16,
        DType::F16,
        DType::F32,
        DType::F64,
    ];

    pub const FLOATING: &'static [DType] = &[DType::BF16, DType::F16, DType::F32, DType::F64];

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::BF16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::BF16 | DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        Self::FLOATING.contains(self)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Ok(DType::U8),
            "i8" | "int8" => Ok(DType::I8),
            "i32" | "int32" => Ok(DType::I32),
            "bf16" | "bfloat16" => Ok(DType::BF16),
            "f16" | "half" | "float16" => Ok(DType::F16),
            "f32" | "float" | "float32" => Ok(DType::F32),
            "f64" | "double" | "float64" => Ok(DType::F64),
            other => Err(Error::Msg(format!("unknown dtype '{other}'"))),
        }
    }
}

/// Arithmetic used inside kernel bodies. Reduced-precision types widen to
/// f32, doubles stay in f64.
pub trait OpMath:
    Copy
    + PartialOrd
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    fn exp(self) -> Self;
    fn tanh(self) -> Self;
    fn erf(self) -> Self;
    fn ln_1p(self) -> Self;
    fn max(self, other: Self) -> Self;
    fn min(self, other: Self) -> Self;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }
}

impl OpMath for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn exp(self) -> Self {
        f32::exp(self)
    }
    fn tanh(self) -> Self {
        f32::tanh(self)
    }
    fn erf(self) -> Self {
        libm::erff(self)
    }
    fn ln_1p(self) -> Self {
        f32::ln_1p(self)
    }
    fn max(self, other: Self) -> Self {
        f32::max(self, other)
    }
    fn min(self, other: Self) -> Self {
        f32::min(self, other)
    }
}

impl OpMath for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    fn erf(self) -> Self {
        libm::erf(self)
    }
    fn ln_1p(self) -> Self {
        f64::ln_1p(self)
    }
    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }
    fn min(self, other: Self) -> Self {
        f64::min(self, other)
    }
}

/// A scalar type that can live in device storage.
pub trait Element: Copy + PartialOrd + Default + Send + Sync + fmt::Debug + 'static {
    const DTYPE: DType;

    /// Conversion from a host scalar argument. Integer types truncate toward
    /// zero and saturate.
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn memory(storage: &Storage) -> Option<&DeviceMemory<Self>>;
    fn into_storage(data: Vec<Self>) -> Storage;

    fn zero() -> Self {
        Self::default()
    }
}

/// Floating element types; kernel math runs in `Acc`.
pub trait FloatElement: Element {
    type Acc: OpMath;

    fn to_acc(self) -> Self::Acc;
    fn from_acc(v: Self::Acc) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:ident, $from:expr, $to:expr) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            fn from_f64(v: f64) -> Self {
                $from(v)
            }

            fn to_f64(self) -> f64 {
                $to(self)
            }

            fn memory(storage: &Storage) -> Option<&DeviceMemory<Self>> {
                match storage {
                    Storage::$dtype(mem) => Some(mem),
                    _ => None,
                }
            }

            fn into_storage(data: Vec<Self>) -> Storage {
                Storage::$dtype(DeviceMemory::from_vec(data))
            }
        }
    };
}

impl_element!(u8, U8, |v: f64| v as u8, |v: u8| v as f64);
impl_element!(i8, I8, |v: f64| v as i8, |v: i8| v as f64);
impl_element!(i32, I32, |v: f64| v as i32, |v: i32| v as f64);
impl_element!(bf16, BF16, bf16::from_f64, |v: bf16| v.to_f64());
impl_element!(f16, F16, f16::from_f64, |v: f16| v.to_f64());
impl_element!(f32, F32, |v: f64| v as f32, |v: f32| v as f64);
impl_element!(f64, F64, |v: f64| v, |v: f64| v);

impl FloatElement for f32 {
    type Acc = f32;
    fn to_acc(self) -> f32 {
        self
    }
    fn from_acc(v: f32) -> Self {
        v
    }
}

impl FloatElement for f64 {
    type Acc = f64;
    fn to_acc(self) -> f64 {
        self
    }
    fn from_acc(v: f64) -> Self {
        v
    }
}

impl FloatElement for f16 {
    type Acc = f32;
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    fn from_acc(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl FloatElement for bf16 {
    type Acc = f32;
    fn to_acc(self) -> f32 {
        self.to_f32()
    }
    fn from_acc(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_parse_and_display() {
        for dtype in DType::ALL {
            let parsed: DType = dtype.as_str().parse().unwrap();
            assert_eq!(parsed, *dtype);
        }
        assert_eq!("bfloat16".parse::<DType>().unwrap(), DType::BF16);
        assert!("complex64".parse::<DType>().is_err());
    }

    #[test]
    fn test_integer_conversion_truncates_and_saturates() {
        assert_eq!(<i8 as Element>::from_f64(-1.7), -1);
        assert_eq!(<i8 as Element>::from_f64(1000.0), i8::MAX);
        assert_eq!(<u8 as Element>::from_f64(-3.0), 0);
    }

    #[test]
    fn test_reduced_precision_accumulates_in_f32() {
        let x = bf16::from_f32(1.5);
        assert_eq!(x.to_acc(), 1.5f32);
        assert_eq!(bf16::from_acc(2.0f32), bf16::from_f32(2.0));
    }
}
