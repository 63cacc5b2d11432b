use super::{EltwiseOp, Engine};
use crate::core::tensor::Tensor;
use crate::error::{Error, Result};

impl Engine {
    pub fn relu(&self, x: &Tensor) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Relu, &[x], None)
    }

    /// In place. Unlike `relu`, the generic path also takes integer tensors.
    pub fn relu_(&self, x: &mut Tensor) -> Result<()> {
        self.eltwise_(&EltwiseOp::Relu, x)
    }

    pub fn relu_out(&self, x: &Tensor, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Relu, &[x], Some(out)).map(|_| ())
    }

    /// `x <= threshold ? value : x`.
    pub fn threshold(&self, x: &Tensor, threshold: f64, value: f64) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Threshold { threshold, value }, &[x, x], None)
    }

    pub fn threshold_(&self, x: &mut Tensor, threshold: f64, value: f64) -> Result<()> {
        self.eltwise_(&EltwiseOp::Threshold { threshold, value }, x)
    }

    pub fn threshold_out(&self, x: &Tensor, threshold: f64, value: f64, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Threshold { threshold, value }, &[x, x], Some(out))
            .map(|_| ())
    }

    /// `x <= threshold ? 0 : grad`.
    pub fn threshold_backward(&self, grad: &Tensor, x: &Tensor, threshold: f64) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Threshold { threshold, value: 0.0 }, &[x, grad], None)
    }

    pub fn threshold_backward_out(&self, grad: &Tensor, x: &Tensor, threshold: f64, grad_input: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Threshold { threshold, value: 0.0 }, &[x, grad], Some(grad_input))
            .map(|_| ())
    }

    pub fn leaky_relu(&self, x: &Tensor, negative_slope: f64) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::LeakyRelu { negative_slope }, &[x], None)
    }

    pub fn leaky_relu_(&self, x: &mut Tensor, negative_slope: f64) -> Result<()> {
        self.eltwise_(&EltwiseOp::LeakyRelu { negative_slope }, x)
    }

    pub fn leaky_relu_out(&self, x: &Tensor, negative_slope: f64, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::LeakyRelu { negative_slope }, &[x], Some(out))
            .map(|_| ())
    }

    /// `x > 0 ? grad : grad * negative_slope`.
    ///
    /// With `self_is_result` the forward output stands in for the input,
    /// which only determines the sign correctly for a non-negative slope.
    pub fn leaky_relu_backward(
        &self,
        grad: &Tensor,
        x: &Tensor,
        negative_slope: f64,
        self_is_result: bool,
    ) -> Result<Tensor> {
        if self_is_result && negative_slope < 0.0 {
            return Err(Error::precondition(
                "leaky_relu_backward",
                "in-place leaky relu backward with a negative slope is not supported, \
                 call the out-of-place forward instead",
            ));
        }
        self.eltwise(&EltwiseOp::LeakyReluBackward { negative_slope }, &[grad, x], None)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::Algorithm;
    use crate::core::tensor::Tensor;
    use crate::core::types::DType;
    use crate::error::Error;
    use crate::ops::tests::{engine, fused_engine};
    use crate::ops::{EltwiseOp, ExecutionPlan};

    #[test]
    fn test_relu_plain() {
        let e = engine();
        let x = Tensor::from_vec(vec![-1.5f32, 0.0, 2.0, -0.0], &[2, 2]).unwrap();
        assert_eq!(e.relu(&x).unwrap().to_vec::<f32>().unwrap(), vec![0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_integer_relu_only_in_place() {
        let e = engine();
        let mut x = Tensor::from_vec(vec![-3i32, 4, -5, 6], &[4]).unwrap();
        assert!(matches!(e.relu(&x), Err(Error::UnsupportedDType { .. })));
        e.relu_(&mut x).unwrap();
        assert_eq!(x.to_vec::<i32>().unwrap(), vec![0, 4, 0, 6]);
    }

    #[test]
    fn test_fused_relu_matches_generic() {
        let e = engine();
        let values: Vec<f32> = (0..40).map(|i| (i as f32 - 20.0) * 0.37).collect();
        let plain = Tensor::from_vec(values, &[2, 5, 4]).unwrap();
        let opaque = e.to_opaque(&plain).unwrap();
        assert!(e.plan(&EltwiseOp::Relu, &[&opaque], None).unwrap().is_fused());
        let fused = e.to_plain(&e.relu(&opaque).unwrap()).unwrap();
        let generic = e.relu(&plain).unwrap();
        assert_eq!(fused.to_vec::<f32>().unwrap(), generic.to_vec::<f32>().unwrap());
    }

    #[test]
    fn test_in_place_on_opaque_input() {
        let e = engine();
        // f32 stays opaque on the fused path
        let mut x = e.to_opaque(&Tensor::from_vec(vec![-1f32, 3.0], &[1, 2]).unwrap()).unwrap();
        e.relu_(&mut x).unwrap();
        assert!(x.is_opaque());
        assert_eq!(e.to_plain(&x).unwrap().to_vec::<f32>().unwrap(), vec![0.0, 3.0]);

        // f64 has no fused primitive and is replaced by its plain reorder
        let mut y = e.to_opaque(&Tensor::from_vec(vec![-1f64, 3.0], &[1, 2]).unwrap()).unwrap();
        e.leaky_relu_(&mut y, 0.1).unwrap();
        assert!(!y.is_opaque());
        assert_eq!(y.to_vec::<f64>().unwrap(), vec![-0.1, 3.0]);
    }

    #[test]
    fn test_threshold_every_dtype() {
        let e = engine();
        let x = Tensor::from_vec(vec![1i8, 2, 3, 4], &[4]).unwrap();
        let y = e.threshold(&x, 2.0, -7.0).unwrap();
        assert_eq!(y.to_vec::<i8>().unwrap(), vec![-7, -7, 3, 4]);

        let mut z = Tensor::from_vec(vec![0.5f64, 2.5], &[2]).unwrap();
        e.threshold_(&mut z, 1.0, 9.0).unwrap();
        assert_eq!(z.to_vec::<f64>().unwrap(), vec![9.0, 2.5]);
    }

    #[test]
    fn test_threshold_zero_zero_reroutes_to_relu_backward() {
        let generic = engine();
        let fused = fused_engine();
        let x = Tensor::from_vec(vec![-2f32, -0.0, 0.5, 3.0, 1.0, -1.0], &[2, 3]).unwrap();
        let grad = Tensor::from_vec(vec![10f32, 20.0, 30.0, 40.0, 50.0, 60.0], &[2, 3]).unwrap();

        let plan = fused.plan(&EltwiseOp::Threshold { threshold: 0.0, value: 0.0 }, &[&x, &grad], None).unwrap();
        match plan {
            ExecutionPlan::Fused(p) => assert_eq!(p.algorithm, Algorithm::EltwiseRelu),
            other => panic!("unexpected {other:?}"),
        }
        let a = fused.threshold_backward(&grad, &x, 0.0).unwrap();
        let b = generic.threshold_backward(&grad, &x, 0.0).unwrap();
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![0.0, 0.0, 30.0, 40.0, 50.0, 0.0]);
        assert_eq!(a.to_vec::<f32>().unwrap(), b.to_vec::<f32>().unwrap());

        // a non-zero replacement value stays generic
        let plan = fused.plan(&EltwiseOp::Threshold { threshold: 0.0, value: 1.0 }, &[&x, &grad], None).unwrap();
        assert!(!plan.is_fused());
    }

    #[test]
    fn test_threshold_backward_broadcasts_grad() {
        let e = fused_engine();
        let x = Tensor::from_vec(vec![-1f32, 2.0, 3.0, -4.0], &[2, 2]).unwrap();
        let grad = Tensor::from_vec(vec![5f32, 6.0], &[1, 2]).unwrap();
        let y = e.threshold_backward(&grad, &x, 0.0).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![0.0, 6.0, 5.0, 0.0]);
    }

    #[test]
    fn test_threshold_out_into_strided_view() {
        let e = engine();
        let x = Tensor::from_vec(vec![1f32, 5.0, 2.0, 6.0, 3.0, 7.0], &[3, 2]).unwrap();
        let base = Tensor::zeros(&[2, 3], DType::F32);
        let out = base.transpose(0, 1).unwrap();
        e.threshold_out(&x, 4.0, 0.0, &out).unwrap();

        let dense = Tensor::zeros(&[3, 2], DType::F32);
        e.threshold_out(&x, 4.0, 0.0, &dense).unwrap();
        assert_eq!(e.contiguous(&out).unwrap().to_vec::<f32>().unwrap(), dense.to_vec::<f32>().unwrap());
        assert_eq!(base.to_vec::<f32>().unwrap(), vec![0.0, 0.0, 0.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_leaky_relu_and_backward() {
        let e = engine();
        let x = Tensor::from_vec(vec![-2f64, 0.0, 4.0], &[3]).unwrap();
        assert_eq!(e.leaky_relu(&x, 0.25).unwrap().to_vec::<f64>().unwrap(), vec![-0.5, 0.0, 4.0]);
        let grad = Tensor::from_vec(vec![1f64, 1.0, 1.0], &[3]).unwrap();
        let dx = e.leaky_relu_backward(&grad, &x, 0.25, false).unwrap();
        assert_eq!(dx.to_vec::<f64>().unwrap(), vec![0.25, 0.25, 1.0]);
        assert!(e.leaky_relu_backward(&grad, &x, -0.25, true).is_err());
    }

    #[test]
    fn test_relu_out_rejects_opaque_destination_on_generic_path() {
        let e = engine();
        let x = Tensor::from_vec(vec![1f64, -1.0], &[1, 2]).unwrap();
        let out = e.to_opaque(&Tensor::zeros(&[1, 2], DType::F64)).unwrap();
        assert!(matches!(e.relu_out(&x, &out), Err(Error::LayoutConflict { .. })));
    }

    #[test]
    fn test_integer_leaky_relu_unsupported_in_every_layout() {
        let e = engine();
        let plain = Tensor::from_vec(vec![-4i32, 6, -3, 5], &[1, 4]).unwrap();
        let opaque = e.to_opaque(&plain).unwrap();
        assert!(!e.plan(&EltwiseOp::LeakyRelu { negative_slope: 0.5 }, &[&opaque], None).unwrap().is_fused());
        assert!(matches!(e.leaky_relu(&plain, 0.5), Err(Error::UnsupportedDType { .. })));
        assert!(matches!(e.leaky_relu(&opaque, 0.5), Err(Error::UnsupportedDType { .. })));

        // plain relu keeps its integer primitive
        assert!(e.plan(&EltwiseOp::Relu, &[&opaque], None).unwrap().is_fused());
        let y = e.to_plain(&e.relu(&opaque).unwrap()).unwrap();
        assert_eq!(y.to_vec::<i32>().unwrap(), vec![0, 6, 0, 5]);
    }

    #[test]
    fn test_out_overlapping_input_window_rejected() {
        let e = engine();
        let base = Tensor::from_vec(vec![-8f32; 8], &[8]).unwrap();
        let x = base.narrow(0, 0, 6).unwrap();
        let out = base.narrow(0, 2, 6).unwrap();
        assert!(matches!(e.leaky_relu_out(&x, 0.5, &out), Err(Error::Precondition { .. })));
        assert_eq!(base.to_vec::<f32>().unwrap(), vec![-8.0; 8]);

        // the very same view is an in-place write
        e.leaky_relu_out(&x, 0.5, &x).unwrap();
        assert_eq!(base.to_vec::<f32>().unwrap(), vec![-4.0, -4.0, -4.0, -4.0, -4.0, -4.0, -8.0, -8.0]);
    }

    #[test]
    fn test_fused_out_with_wrong_shape() {
        let e = engine();
        let opaque = e.to_opaque(&Tensor::from_vec(vec![-1f32, 2.0, -3.0, 4.0], &[1, 4]).unwrap()).unwrap();
        let out = Tensor::zeros(&[2, 4], DType::F32);
        assert!(matches!(
            e.relu_out(&opaque, &out),
            Err(Error::ShapeMismatch { lhs, rhs, .. }) if lhs == vec![2, 4] && rhs == vec![1, 4]
        ));
    }

    #[test]
    fn test_relu_backward_on_channels_last_pair() {
        let nhwc = |offset: f32| {
            let values: Vec<f32> = (0..24).map(|i| i as f32 - offset).collect();
            Tensor::from_vec(values, &[1, 2, 4, 3]).unwrap().permute(&[0, 3, 1, 2]).unwrap()
        };
        let x = nhwc(12.0);
        let grad = nhwc(-1.0);
        assert!(x.is_channels_last() && !x.is_contiguous());
        let op = EltwiseOp::Threshold { threshold: 0.0, value: 0.0 };
        assert!(fused_engine().plan(&op, &[&x, &grad], None).unwrap().is_fused());
        let fused = fused_engine().threshold_backward(&grad, &x, 0.0).unwrap();
        let generic = engine().threshold_backward(&grad, &x, 0.0).unwrap();
        assert_eq!(fused.to_vec::<f32>().unwrap(), generic.to_vec::<f32>().unwrap());
    }
}
