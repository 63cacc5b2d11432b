//! Fused primitive collaborator.
//!
//! A backend executes a named algorithm over layout-aware memory
//! descriptors. It is free to read and write opaque memory directly, which is
//! what makes the fused path worth taking.

pub mod reference;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

pub use reference::ReferenceBackend;

use crate::core::storage::Storage;
use crate::core::tensor::Tensor;
use crate::error::Result;
use crate::layout::MemoryDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Algorithm {
    /// `x > 0 ? x : alpha * x`; backward is the matching gradient.
    EltwiseRelu,
    EltwiseGeluTanh,
    EltwiseGeluErf,
    EltwiseMish,
    Prelu,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::EltwiseRelu => "eltwise_relu",
            Algorithm::EltwiseGeluTanh => "eltwise_gelu_tanh",
            Algorithm::EltwiseGeluErf => "eltwise_gelu_erf",
            Algorithm::EltwiseMish => "eltwise_mish",
            Algorithm::Prelu => "prelu",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Propagation {
    Forward,
    Backward,
}

/// A memory descriptor bound to the storage it describes.
#[derive(Debug, Clone)]
pub struct Memory {
    pub desc: MemoryDesc,
    pub storage: Arc<Storage>,
}

impl Memory {
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            desc: tensor.desc(),
            storage: Arc::clone(tensor.storage()),
        }
    }
}

pub trait PrimitiveBackend: Send + Sync {
    fn name(&self) -> &str;

    fn eltwise_forward(&self, algorithm: Algorithm, src: &Memory, dst: &Memory, alpha: f32, beta: f32) -> Result<()>;

    fn eltwise_backward(
        &self,
        algorithm: Algorithm,
        diff_dst: &Memory,
        src: &Memory,
        diff_src: &Memory,
        alpha: f32,
        beta: f32,
    ) -> Result<()>;

    /// `weights` holds one value, or one per channel (dim 1 of `src`).
    fn prelu_forward(&self, src: &Memory, weights: &Memory, dst: &Memory) -> Result<()>;
}
