use super::{EltwiseOp, Engine};
use crate::core::tensor::Tensor;
use crate::error::Result;

impl Engine {
    /// `x * sigmoid(x)`.
    pub fn silu(&self, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Silu, &[x], None)
    }

    pub fn silu_out(&self, x: &Tensor, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Silu, &[x], Some(out)).map(|_| ())
    }

    /// Defined for f32, f64 and bf16.
    pub fn silu_backward(&self, grad: &Tensor, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::SiluBackward, &[grad, x], None)
    }

    /// `x * tanh(softplus(x))`.
    pub fn mish(&self, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Mish, &[x], None)
    }

    pub fn mish_out(&self, x: &Tensor, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Mish, &[x], Some(out)).map(|_| ())
    }
}
