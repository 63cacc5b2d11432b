//! Dtype dispatch: a runtime `DType` selects one monomorphized kernel body.
//!
//! The match is resolved once per call; inside the parallel region the body
//! runs fully typed with no further dispatch.

/// Expands to a `match` over the listed dtypes, binding `$T` to the concrete
/// element type in each arm. Unlisted dtypes yield `Error::UnsupportedDType`
/// naming `$op`.
macro_rules! dispatch_types {
    ($dtype:expr, $op:expr, [$($variant:ident => $ty:ty),+ $(,)?], |$T:ident| $body:expr) => {
        match $dtype {
            $(
                $crate::core::types::DType::$variant => {
                    type $T = $ty;
                    $body
                }
            )+
            #[allow(unreachable_patterns)]
            other => Err($crate::error::Error::unsupported_dtype($op, other)),
        }
    };
}

/// f32, f64, f16 and bf16.
macro_rules! dispatch_floating_types {
    ($dtype:expr, $op:expr, |$T:ident| $body:expr) => {
        $crate::kernels::dispatch::dispatch_types!(
            $dtype,
            $op,
            [
                F32 => f32,
                F64 => f64,
                F16 => ::half::f16,
                BF16 => ::half::bf16,
            ],
            |$T| $body
        )
    };
}

/// Every dtype the engine knows.
macro_rules! dispatch_all_types {
    ($dtype:expr, $op:expr, |$T:ident| $body:expr) => {
        $crate::kernels::dispatch::dispatch_types!(
            $dtype,
            $op,
            [
                U8 => u8,
                I8 => i8,
                I32 => i32,
                F32 => f32,
                F64 => f64,
                F16 => ::half::f16,
                BF16 => ::half::bf16,
            ],
            |$T| $body
        )
    };
}

pub(crate) use dispatch_all_types;
pub(crate) use dispatch_floating_types;
pub(crate) use dispatch_types;
