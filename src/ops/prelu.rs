use log::debug;

use super::Engine;
use crate::backend::Memory;
use crate::core::tensor::Tensor;
use crate::error::{Error, Result};
use crate::kernels::dispatch::dispatch_floating_types;
use crate::kernels::prelu as kernels;
use crate::layout::LayoutDescriptor;
use crate::layout::oracle::EligibilityPredicate;

/// Weight must be a scalar or a vector holding one slope, or one per channel
/// (dim 1 of `x`).
fn check_weight(op: &str, x: &Tensor, weight: &Tensor) -> Result<()> {
    if weight.rank() > 1 {
        return Err(Error::precondition(
            op,
            format!("expected `weight` to be a scalar or 1D tensor, but got ndim = {}", weight.rank()),
        ));
    }
    if weight.dtype() != x.dtype() {
        return Err(Error::precondition(
            op,
            format!("weight dtype {} does not match input dtype {}", weight.dtype(), x.dtype()),
        ));
    }
    let weights = weight.elem_count();
    if weights == 1 {
        return Ok(());
    }
    if x.rank() == 0 {
        return Err(Error::precondition(op, "zero-dim input is not allowed with per-channel weights"));
    }
    let channels = if x.rank() > 1 { x.shape()[1] } else { 1 };
    if channels != weights {
        return Err(Error::WeightMismatch {
            op: op.to_string(),
            weights,
            channels,
        });
    }
    Ok(())
}

impl Engine {
    /// `x > 0 ? x : w[c] * x` with a shared slope or one per channel.
    pub fn prelu(&self, x: &Tensor, weight: &Tensor) -> Result<Tensor> {
        let op = "prelu";
        self.check_devices(op, [x, weight])?;
        check_weight(op, x, weight)?;
        let weight = self.contiguous(weight)?;

        if let Some(format) = x.layout().opaque_format() {
            if x.dtype().is_float() && EligibilityPredicate::EltwiseForward.accepts(&[LayoutDescriptor::of(x)]) {
                let dst = Tensor::opaque_zeros(x.shape(), x.dtype(), format).on_device(x.device());
                self.backend().prelu_forward(&Memory::of(x), &Memory::of(&weight), &Memory::of(&dst))?;
                debug!("{op}: fused on {:?}", x.shape());
                return Ok(dst);
            }
        }

        let input = self.contiguous(x)?;
        let result = Tensor::zeros(x.shape(), x.dtype()).on_device(x.device());
        let q = self.queue();
        dispatch_floating_types!(x.dtype(), op, |T| kernels::prelu_forward::<T>(q, &result, &input, &weight))?;
        Ok(result)
    }

    /// Returns `(input_grad, weight_grad)`.
    ///
    /// One launch writes the input gradient together with a per-element
    /// weight-gradient collector; after a barrier the collector is summed
    /// into `weight_grad`.
    pub fn prelu_backward(&self, grad_out: &Tensor, x: &Tensor, weight: &Tensor) -> Result<(Tensor, Tensor)> {
        let op = "prelu_backward";
        self.check_devices(op, [grad_out, x, weight])?;
        check_weight(op, x, weight)?;
        if grad_out.shape() != x.shape() {
            return Err(Error::ShapeMismatch {
                op: op.to_string(),
                lhs: grad_out.shape().to_vec(),
                rhs: x.shape().to_vec(),
            });
        }
        if grad_out.dtype() != x.dtype() {
            return Err(Error::precondition(
                op,
                format!("grad dtype {} does not match input dtype {}", grad_out.dtype(), x.dtype()),
            ));
        }

        let input = self.contiguous(x)?;
        let grad_out = self.contiguous(grad_out)?;
        let weight = self.contiguous(weight)?;
        let device = x.device();
        let input_grad = Tensor::zeros(x.shape(), x.dtype()).on_device(device);
        let collector = Tensor::zeros(x.shape(), x.dtype()).on_device(device);
        let weight_grad = Tensor::zeros(weight.shape(), weight.dtype()).on_device(device);

        let q = self.queue();
        dispatch_floating_types!(x.dtype(), op, |T| {
            kernels::prelu_backward::<T>(q, &input_grad, &collector, &input, &grad_out, &weight)?;
            q.barrier()?;
            kernels::reduce_weight_grad::<T>(q, &weight_grad, &collector)
        })?;
        debug!("{op}: {} weights over {:?}", weight.elem_count(), x.shape());
        Ok((input_grad, weight_grad))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::tensor::Tensor;
    use crate::core::types::DType;
    use crate::error::Error;
    use crate::ops::tests::{assert_close, engine};

    #[test]
    fn test_shared_weight_forward_and_backward() {
        let e = engine();
        let x = Tensor::from_vec(vec![-2f32, 1.0, -0.5, 3.0, 0.0, -4.0], &[2, 3]).unwrap();
        let w = Tensor::from_vec(vec![0.25f32], &[1]).unwrap();
        let y = e.prelu(&x, &w).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![-0.5, 1.0, -0.125, 3.0, 0.0, -1.0]);

        let g = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let (dx, dw) = e.prelu_backward(&g, &x, &w).unwrap();
        assert_eq!(dx.to_vec::<f32>().unwrap(), vec![0.25, 2.0, 0.75, 4.0, 1.25, 1.5]);
        // sum of x * g over x <= 0
        assert_eq!(dw.to_vec::<f32>().unwrap(), vec![-2.0 - 1.5 + 0.0 - 24.0]);
    }

    #[test]
    fn test_per_channel_weights() {
        let e = engine();
        let x = Tensor::from_vec((0..12).map(|i| -(i as f64)).collect(), &[2, 3, 2]).unwrap();
        let w = Tensor::from_vec(vec![1f64, 2.0, 3.0], &[3]).unwrap();
        let y = e.prelu(&x, &w).unwrap().to_vec::<f64>().unwrap();
        let want: Vec<f64> = (0..12).map(|i| -(i as f64) * [1.0, 2.0, 3.0][(i / 2) % 3]).collect();
        assert_eq!(y, want);

        let g = Tensor::from_vec(vec![1f64; 12], &[2, 3, 2]).unwrap();
        let (_, dw) = e.prelu_backward(&g, &x, &w).unwrap();
        // channel c collects -(i) for i in {2c, 2c+1, 6+2c, 7+2c}
        assert_close(&dw.to_vec::<f64>().unwrap(), &[-14.0, -22.0, -30.0], 0.0);
    }

    #[test]
    fn test_weight_validation() {
        let e = engine();
        let x = Tensor::zeros(&[2, 3], DType::F32);
        let bad_count = Tensor::zeros(&[4], DType::F32);
        assert!(matches!(
            e.prelu(&x, &bad_count),
            Err(Error::WeightMismatch { weights: 4, channels: 3, .. })
        ));
        let matrix = Tensor::zeros(&[1, 3], DType::F32);
        assert!(matches!(e.prelu(&x, &matrix), Err(Error::Precondition { .. })));
        let scalar_input = Tensor::zeros(&[], DType::F32);
        let per_channel = Tensor::zeros(&[3], DType::F32);
        assert!(e.prelu(&scalar_input, &per_channel).is_err());
        // a shared weight works on a zero-dim input
        let shared = Tensor::zeros(&[], DType::F32);
        assert!(e.prelu(&scalar_input, &shared).is_ok());
    }

    #[test]
    fn test_fused_on_opaque_input() {
        let e = engine();
        let plain = Tensor::from_vec((0..16).map(|i| i as f32 - 8.0).collect(), &[2, 4, 2]).unwrap();
        let opaque = e.to_opaque(&plain).unwrap();
        let w = Tensor::from_vec(vec![0.5f32, 1.0, 1.5, 2.0], &[4]).unwrap();
        let fused = e.prelu(&opaque, &w).unwrap();
        assert!(fused.is_opaque());
        let generic = e.prelu(&plain, &w).unwrap();
        assert_eq!(
            e.to_plain(&fused).unwrap().to_vec::<f32>().unwrap(),
            generic.to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_backward_on_strided_grad() {
        let e = engine();
        let x = Tensor::from_vec(vec![-1f32, -2.0, 3.0, -4.0], &[2, 2]).unwrap();
        let g = Tensor::from_vec(vec![1f32, 3.0, 2.0, 4.0], &[2, 2]).unwrap().transpose(0, 1).unwrap();
        let w = Tensor::from_vec(vec![2f32], &[1]).unwrap();
        let (dx, dw) = e.prelu_backward(&g, &x, &w).unwrap();
        assert_eq!(dx.to_vec::<f32>().unwrap(), vec![2.0, 4.0, 3.0, 8.0]);
        assert_eq!(dw.to_vec::<f32>().unwrap(), vec![-1.0 - 4.0 - 16.0]);
    }
}
