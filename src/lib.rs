//! Activation operator engine.
//!
//! Each operator call either runs a fused primitive on layout-aware memory
//! descriptors or falls back to a generic data-parallel kernel over plain
//! strided memory. See `ops::Engine` for the entry points.

pub mod backend;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod ops;
pub mod rng;

pub use crate::config::EngineConfig;
pub use crate::core::tensor::Tensor;
pub use crate::core::types::DType;
pub use crate::error::{Error, Result};
pub use crate::layout::{Layout, OpaqueFormat};
pub use crate::ops::{Engine, ExecutionPlan, GeluApproximation};
pub use crate::rng::Generator;
