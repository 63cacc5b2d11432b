use super::{EltwiseOp, Engine};
use crate::core::tensor::Tensor;
use crate::error::Result;

impl Engine {
    /// Zeroes every element with `|x| <= lambd`.
    pub fn hardshrink(&self, x: &Tensor, lambd: f64) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Hardshrink { lambd }, &[x], None)
    }

    pub fn hardshrink_out(&self, x: &Tensor, lambd: f64, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Hardshrink { lambd }, &[x], Some(out)).map(|_| ())
    }

    pub fn hardshrink_backward(&self, grad: &Tensor, x: &Tensor, lambd: f64) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::HardshrinkBackward { lambd }, &[grad, x], None)
    }

    pub fn hardshrink_backward_out(&self, grad: &Tensor, x: &Tensor, lambd: f64, grad_input: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::HardshrinkBackward { lambd }, &[grad, x], Some(grad_input))
            .map(|_| ())
    }

    /// `x * clamp(x + 3, 0, 6) / 6`.
    pub fn hardswish(&self, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Hardswish, &[x], None)
    }

    pub fn hardswish_(&self, x: &mut Tensor) -> Result<()> {
        self.eltwise_(&EltwiseOp::Hardswish, x)
    }

    pub fn hardswish_out(&self, x: &Tensor, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Hardswish, &[x], Some(out)).map(|_| ())
    }

    pub fn hardswish_backward(&self, grad: &Tensor, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::HardswishBackward, &[grad, x], None)
    }
}
