//! Randomized leaky ReLU training kernel.

use crate::core::tensor::Tensor;
use crate::core::types::{DType, Element, FloatElement};
use crate::device::Queue;
use crate::error::Result;
use crate::kernels::elementwise::Operand;
use crate::kernels::functors::mul;
use crate::kernels::launch::{LaunchPlan, launch};
use crate::rng::{Generator, Philox4x32};

/// Uniforms drawn per Philox block: two doubles or four singles.
pub fn unroll_factor(dtype: DType) -> usize {
    if dtype == DType::F64 { 2 } else { 4 }
}

/// Writes `output` and `noise` for a contiguous `input`:
/// `x > 0 => (x, 1)`, otherwise `(x * r, r)` with `r` uniform in
/// `[lower, upper)`.
///
/// The counter span is reserved from `generator` before submission; lanes
/// derive their streams from (seed, lane, offset) only.
pub(crate) fn rrelu_with_noise<T: FloatElement>(
    queue: &dyn Queue,
    output: &Tensor,
    input: &Tensor,
    noise: &Tensor,
    lower: f64,
    upper: f64,
    generator: &Generator,
) -> Result<()> {
    let op = "rrelu_with_noise";
    let numel = input.elem_count();
    let unroll = unroll_factor(T::DTYPE);
    let plan = LaunchPlan::for_unrolled(numel, queue.max_work_group_size(), unroll);
    let seeds = generator.reserve(plan.counter_offset(numel))?;

    let out = Operand::<T>::new(output, op)?;
    let x = Operand::<T>::new(input, op)?;
    let nz = Operand::<T>::new(noise, op)?;

    let range = upper - lower;
    let (lower_t, upper_t) = (T::from_f64(lower), T::from_f64(upper));
    let one = T::from_f64(1.0);
    let rounded = plan.rounded_size(numel);

    launch(queue, op, &plan, |item| {
        let idx = item.global_id();
        let lanes = item.global_range();
        let mut state = Philox4x32::new(seeds.seed, idx as u64, seeds.offset);
        let mut linear = idx;
        while linear < rounded {
            let draws: [f64; 4] = if unroll == 2 {
                let [a, b] = state.uniform2_double();
                [a, b, 0.0, 0.0]
            } else {
                state.uniform4().map(f64::from)
            };
            for (ii, u) in draws.iter().take(unroll).enumerate() {
                let li = linear + lanes * ii;
                if li >= numel {
                    continue;
                }
                let mut r = T::from_f64(u * range + lower);
                if r >= upper_t && lower_t < upper_t {
                    r = lower_t;
                }
                unsafe {
                    let v = x.load(li);
                    if v <= T::zero() {
                        out.store(li, mul(v, r));
                        nz.store(li, r);
                    } else {
                        out.store(li, v);
                        nz.store(li, one);
                    }
                }
            }
            linear += lanes * unroll;
        }
    })
}
