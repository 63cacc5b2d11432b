use log::debug;

use super::materialize::{Destination, check_partial_overlap};
use super::{EltwiseOp, Engine};
use crate::core::tensor::Tensor;
use crate::error::{Error, Result};
use crate::kernels::dispatch::dispatch_floating_types;
use crate::kernels::random;
use crate::rng::Generator;

const OP: &str = "rrelu_with_noise";

fn midpoint(lower: f64, upper: f64) -> f64 {
    (lower + upper) / 2.0
}

impl Engine {
    /// Randomized leaky ReLU.
    ///
    /// In training mode negative inputs are scaled by a slope drawn uniformly
    /// from `[lower, upper)` and the slopes are recorded in `noise` (1 for
    /// positive inputs). Otherwise this is `leaky_relu` with the midpoint
    /// slope and `noise` is left untouched.
    pub fn rrelu_with_noise(
        &self,
        x: &Tensor,
        noise: &Tensor,
        lower: f64,
        upper: f64,
        training: bool,
        generator: &Generator,
    ) -> Result<Tensor> {
        check_bounds(lower, upper)?;
        if !training {
            return self.leaky_relu(x, midpoint(lower, upper));
        }
        let out = Tensor::zeros(x.shape(), x.dtype()).on_device(x.device());
        self.rrelu_with_noise_out(x, noise, lower, upper, training, generator, &out)?;
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn rrelu_with_noise_out(
        &self,
        x: &Tensor,
        noise: &Tensor,
        lower: f64,
        upper: f64,
        training: bool,
        generator: &Generator,
        out: &Tensor,
    ) -> Result<()> {
        check_bounds(lower, upper)?;
        self.check_devices(OP, [x, noise, out])?;
        check_partial_overlap(OP, out, &[x])?;
        check_partial_overlap(OP, noise, &[x, out])?;
        if x.elem_count() == 0 {
            return Ok(());
        }
        if !training {
            return self.leaky_relu_out(x, midpoint(lower, upper), out);
        }
        let dtype = x.dtype();
        let input = self.contiguous(x)?;
        let device = self.queue.device_id();
        let output = Destination::resolve(OP, Some(out), x.shape(), dtype, device)?;
        let recorded = Destination::resolve(OP, Some(noise), x.shape(), dtype, device)?;
        let q = self.queue();
        dispatch_floating_types!(dtype, OP, |T| random::rrelu_with_noise::<T>(
            q,
            output.kernel_target(),
            &input,
            recorded.kernel_target(),
            lower,
            upper,
            generator
        ))?;
        debug!("{OP}: {} elements, slopes in [{lower}, {upper})", x.elem_count());
        output.finish(q)?;
        recorded.finish(q)?;
        Ok(())
    }

    /// In place. An opaque `x` is replaced by its plain reorder.
    pub fn rrelu_with_noise_(
        &self,
        x: &mut Tensor,
        noise: &Tensor,
        lower: f64,
        upper: f64,
        training: bool,
        generator: &Generator,
    ) -> Result<()> {
        check_bounds(lower, upper)?;
        if !training {
            return self.leaky_relu_(x, midpoint(lower, upper));
        }
        if x.is_opaque() {
            *x = self.to_plain(x)?;
        }
        let target = x.clone();
        self.rrelu_with_noise_out(&target, noise, lower, upper, training, generator, &target)
    }

    /// Training: `noise * grad`. Evaluation: leaky ReLU backward with the
    /// midpoint slope.
    #[allow(clippy::too_many_arguments)]
    pub fn rrelu_with_noise_backward(
        &self,
        grad: &Tensor,
        x: &Tensor,
        noise: &Tensor,
        lower: f64,
        upper: f64,
        training: bool,
        self_is_result: bool,
    ) -> Result<Tensor> {
        if training {
            self.eltwise(&EltwiseOp::Mul, &[noise, grad], None)
        } else {
            self.leaky_relu_backward(grad, x, midpoint(lower, upper), self_is_result)
        }
    }
}

fn check_bounds(lower: f64, upper: f64) -> Result<()> {
    if lower > upper {
        return Err(Error::precondition(
            OP,
            format!("lower bound {lower} must not exceed upper bound {upper}"),
        ));
    }
    Ok(())
}
