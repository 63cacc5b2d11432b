//! Parametric ReLU kernels and the weight-gradient reduction.
//!
//! Inputs are dense row-major; the channel of element `i` is
//! `(i % stride0) / stride1` for per-channel weights and 0 for a shared one.

use crate::core::tensor::{Tensor, contiguous_strides};
use crate::core::types::{DType, Element, FloatElement};
use crate::device::Queue;
use crate::error::Result;
use crate::kernels::elementwise::Operand;
use crate::kernels::functors::mul;
use crate::kernels::launch::launch_elements;

/// Elements summed by one lane in the first reduction stage of a shared
/// weight gradient.
const REDUCE_CHUNK: usize = 1024;

/// Maps a linear index to its weight slot.
#[derive(Debug, Clone, Copy)]
struct ChannelMap {
    shared: bool,
    stride0: usize,
    stride1: usize,
}

impl ChannelMap {
    fn new(input: &Tensor, weights: usize) -> Self {
        let strides = contiguous_strides(input.shape());
        let (stride0, stride1) = if input.rank() > 1 {
            (strides[0].max(1), strides[1].max(1))
        } else {
            (1, 1)
        };
        Self {
            shared: weights == 1,
            stride0,
            stride1,
        }
    }

    #[inline]
    fn channel(&self, linear: usize) -> usize {
        if self.shared {
            0
        } else {
            (linear % self.stride0) / self.stride1
        }
    }
}

pub(crate) fn prelu_forward<T: FloatElement>(
    queue: &dyn Queue,
    output: &Tensor,
    input: &Tensor,
    weight: &Tensor,
) -> Result<()> {
    let op = "prelu";
    let map = ChannelMap::new(input, weight.elem_count());
    let out = Operand::<T>::new(output, op)?;
    let x = Operand::<T>::new(input, op)?;
    let w = Operand::<T>::new(weight, op)?;
    launch_elements(queue, op, input.elem_count(), |i| unsafe {
        let v = x.load(i);
        let y = if v > T::zero() { v } else { mul(w.load(map.channel(i)), v) };
        out.store(i, y);
    })
}

/// One launch producing both the input gradient and the per-element weight
/// gradient collector (`x > 0 ? 0 : x * dy`).
pub(crate) fn prelu_backward<T: FloatElement>(
    queue: &dyn Queue,
    input_grad: &Tensor,
    collector: &Tensor,
    input: &Tensor,
    grad_out: &Tensor,
    weight: &Tensor,
) -> Result<()> {
    let op = "prelu_backward";
    let map = ChannelMap::new(input, weight.elem_count());
    let ig = Operand::<T>::new(input_grad, op)?;
    let col = Operand::<T>::new(collector, op)?;
    let x = Operand::<T>::new(input, op)?;
    let dy = Operand::<T>::new(grad_out, op)?;
    let w = Operand::<T>::new(weight, op)?;
    launch_elements(queue, op, input.elem_count(), |i| unsafe {
        let v = x.load(i);
        let g = dy.load(i);
        if v > T::zero() {
            ig.store(i, g);
            col.store(i, T::zero());
        } else {
            ig.store(i, mul(w.load(map.channel(i)), g));
            col.store(i, mul(v, g));
        }
    })
}

/// Sums `collector` into `weight_grad`: over every element for a shared
/// weight, over dims {0, 2, ..} for per-channel weights.
///
/// Two stages separated by a queue barrier: per-(row, channel) partial sums
/// in f64, then one lane per channel.
pub(crate) fn reduce_weight_grad<T: FloatElement>(
    queue: &dyn Queue,
    weight_grad: &Tensor,
    collector: &Tensor,
) -> Result<()> {
    let op = "prelu_weight_grad";
    let numel = collector.elem_count();
    let channels = weight_grad.elem_count();
    let (outer, inner) = if channels == 1 {
        (numel.div_ceil(REDUCE_CHUNK), REDUCE_CHUNK)
    } else {
        let dims = collector.shape();
        (dims[0], dims[2..].iter().product())
    };

    let partials = Tensor::zeros(&[outer.max(1), channels], DType::F64);
    let part = Operand::<f64>::new(&partials, op)?;
    let col = Operand::<T>::new(collector, op)?;
    launch_elements(queue, op, outer * channels, |slot| {
        let (o, c) = (slot / channels, slot % channels);
        let base = (o * channels + c) * inner;
        let end = (base + inner).min(numel);
        let mut acc = 0.0;
        for i in base..end {
            acc += unsafe { col.load(i) }.to_f64();
        }
        unsafe { part.store(slot, acc) };
    })?;
    queue.barrier()?;

    let wg = Operand::<T>::new(weight_grad, op)?;
    launch_elements(queue, op, channels, |c| {
        let mut acc = 0.0;
        for o in 0..outer {
            acc += unsafe { part.load(o * channels + c) };
        }
        unsafe { wg.store(c, T::from_f64(acc)) };
    })
}
