use super::{EltwiseOp, Engine, GeluApproximation};
use crate::core::tensor::Tensor;
use crate::error::Result;

impl Engine {
    pub fn gelu(&self, x: &Tensor, approximate: GeluApproximation) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::Gelu(approximate), &[x], None)
    }

    pub fn gelu_out(&self, x: &Tensor, approximate: GeluApproximation, out: &Tensor) -> Result<()> {
        self.eltwise(&EltwiseOp::Gelu(approximate), &[x], Some(out)).map(|_| ())
    }

    pub fn gelu_backward(&self, grad: &Tensor, x: &Tensor, approximate: GeluApproximation) -> Result<Tensor> {
        self.eltwise(&EltwiseOp::GeluBackward(approximate), &[grad, x], None)
    }

    pub fn gelu_backward_out(
        &self,
        grad: &Tensor,
        x: &Tensor,
        approximate: GeluApproximation,
        grad_input: &Tensor,
    ) -> Result<()> {
        self.eltwise(&EltwiseOp::GeluBackward(approximate), &[grad, x], Some(grad_input))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::Algorithm;
    use crate::core::tensor::Tensor;
    use crate::core::types::DType;
    use crate::ops::tests::{assert_close, engine, fused_engine};
    use crate::ops::{EltwiseOp, ExecutionPlan, GeluApproximation};

    #[test]
    fn test_gelu_values() {
        let e = engine();
        let x = Tensor::from_vec(vec![-1f64, 0.0, 1.0, 3.0], &[4]).unwrap();
        let erf = e.gelu(&x, GeluApproximation::None).unwrap().to_vec::<f64>().unwrap();
        assert_close(&erf, &[-0.158655253931457, 0.0, 0.841344746068543, 2.995950305905110], 1e-12);
        let tanh = e.gelu(&x, GeluApproximation::Tanh).unwrap().to_vec::<f64>().unwrap();
        assert_close(&tanh, &[-0.158808009391723, 0.0, 0.841191990608277, 2.996362607918227], 1e-12);
    }

    #[test]
    fn test_backward_matches_numerical_derivative() {
        let e = engine();
        let h = 1e-5;
        let xs: Vec<f64> = (0..21).map(|i| -5.0 + 0.5 * i as f64).collect();
        for approximate in [GeluApproximation::None, GeluApproximation::Tanh] {
            let x = Tensor::from_vec(xs.clone(), &[xs.len()]).unwrap();
            let ones = Tensor::from_vec(vec![1f64; xs.len()], &[xs.len()]).unwrap();
            let grad = e.gelu_backward(&ones, &x, approximate).unwrap().to_vec::<f64>().unwrap();
            let plus: Vec<f64> = xs.iter().map(|v| v + h).collect();
            let minus: Vec<f64> = xs.iter().map(|v| v - h).collect();
            let fp = e.gelu(&Tensor::from_vec(plus, &[xs.len()]).unwrap(), approximate).unwrap();
            let fm = e.gelu(&Tensor::from_vec(minus, &[xs.len()]).unwrap(), approximate).unwrap();
            let (fp, fm) = (fp.to_vec::<f64>().unwrap(), fm.to_vec::<f64>().unwrap());
            for i in 0..xs.len() {
                let numeric = (fp[i] - fm[i]) / (2.0 * h);
                assert!(
                    (grad[i] - numeric).abs() <= 1e-3 * numeric.abs().max(1e-3),
                    "{approximate} at {}: {} vs {numeric}",
                    xs[i],
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn test_fused_gelu_on_opaque_input() {
        let e = engine();
        let plain = Tensor::from_vec((0..8).map(|i| i as f32 * 0.5 - 2.0).collect(), &[2, 4]).unwrap();
        let opaque = e.to_opaque(&plain).unwrap();
        let plan = e.plan(&EltwiseOp::Gelu(GeluApproximation::Tanh), &[&opaque], None).unwrap();
        match plan {
            ExecutionPlan::Fused(p) => assert_eq!(p.algorithm, Algorithm::EltwiseGeluTanh),
            other => panic!("unexpected {other:?}"),
        }
        let fused = e.to_plain(&e.gelu(&opaque, GeluApproximation::Tanh).unwrap()).unwrap();
        let generic = e.gelu(&plain, GeluApproximation::Tanh).unwrap();
        assert_eq!(fused.to_vec::<f32>().unwrap(), generic.to_vec::<f32>().unwrap());
    }

    #[test]
    fn test_backward_fused_for_bf16_only_pairs() {
        let e = fused_engine();
        let x = Tensor::from_f64_slice(&[-1.0, 0.5, 2.0], &[3], DType::BF16).unwrap();
        let g = Tensor::from_f64_slice(&[1.0, 1.0, 1.0], &[3], DType::BF16).unwrap();
        let op = EltwiseOp::GeluBackward(GeluApproximation::None);
        assert!(e.plan(&op, &[&g, &x], None).unwrap().is_fused());

        let x16 = Tensor::from_f64_slice(&[-1.0, 0.5, 2.0], &[3], DType::F16).unwrap();
        let g16 = Tensor::from_f64_slice(&[1.0, 1.0, 1.0], &[3], DType::F16).unwrap();
        assert!(!e.plan(&op, &[&g16, &x16], None).unwrap().is_fused());

        let fused = e.gelu_backward(&g, &x, GeluApproximation::None).unwrap().to_f64_vec().unwrap();
        let generic = engine().gelu_backward(&g, &x, GeluApproximation::None).unwrap().to_f64_vec().unwrap();
        assert_eq!(fused, generic);
    }

    #[test]
    fn test_gelu_out_writes_through_view() {
        let e = engine();
        let x = Tensor::from_vec(vec![1f32, 2.0], &[2]).unwrap();
        let base = Tensor::zeros(&[4], DType::F32);
        let out = base.narrow(0, 1, 2).unwrap();
        e.gelu_out(&x, GeluApproximation::None, &out).unwrap();
        let v = base.to_vec::<f32>().unwrap();
        assert_eq!(v[0], 0.0);
        assert_eq!(v[3], 0.0);
        assert!((v[1] - 0.841_344_7).abs() < 1e-6);
    }
}
