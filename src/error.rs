use thiserror::Error;

use crate::core::types::DType;

/// Errors raised by the engine. Every variant is fail-fast: nothing in the
/// crate retries or returns partial results.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: unsupported dtype {dtype}")]
    UnsupportedDType { op: String, dtype: DType },

    #[error("{op}: {msg}")]
    Precondition { op: String, msg: String },

    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error(
        "{op}: mismatch of parameter numbers and input channel size, found parameter numbers = {weights} and channel size = {channels}"
    )]
    WeightMismatch {
        op: String,
        weights: usize,
        channels: usize,
    },

    /// An opaque destination that the chosen execution path cannot write.
    #[error("{op}: cannot convert tensor slice to plain format")]
    LayoutConflict { op: String },

    #[error("primitive backend {backend} failed: {msg}")]
    Backend { backend: String, msg: String },

    #[error("device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Msg(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn precondition(op: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Precondition {
            op: op.into(),
            msg: msg.into(),
        }
    }

    pub fn unsupported_dtype(op: impl Into<String>, dtype: DType) -> Self {
        Self::UnsupportedDType {
            op: op.into(),
            dtype,
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::Error::Msg(format!($msg)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::Msg(format!($fmt, $($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_conflict_message() {
        let err = Error::LayoutConflict {
            op: "relu".to_string(),
        };
        assert_eq!(err.to_string(), "relu: cannot convert tensor slice to plain format");
    }

    #[test]
    fn test_unsupported_dtype_names_op_and_dtype() {
        let err = Error::unsupported_dtype("gelu", DType::I32);
        let msg = err.to_string();
        assert!(msg.contains("gelu"));
        assert!(msg.contains("i32"));
    }
}
