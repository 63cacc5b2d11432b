//! Operator entry points and the primitive dispatch engine.
//!
//! Every activation call goes through `Engine::plan`: when the fused
//! primitive accepts the operands' layouts the call runs on the primitive
//! backend, otherwise opaque inputs are reordered to plain and a generic
//! kernel runs on the queue.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::backend::{Algorithm, Memory, PrimitiveBackend, Propagation, ReferenceBackend};
use crate::config::EngineConfig;
use crate::core::tensor::Tensor;
use crate::core::types::{DType, Element, FloatElement};
use crate::device::{HostQueue, Queue};
use crate::error::{Error, Result};
use crate::kernels::dispatch::{dispatch_all_types, dispatch_floating_types, dispatch_types};
use crate::kernels::elementwise::{binary, unary};
use crate::kernels::functors::{self, acc};
use crate::kernels::launch::LaunchPlan;
use crate::layout::oracle::{EligibilityPredicate, broadcast_shape, destination_eligible};
use crate::layout::{LayoutDescriptor, OpaqueFormat, reorder};
use crate::rng::Generator;

use materialize::{Destination, check_partial_overlap};

mod materialize;

// Activation families
mod gelu;
mod hard;
mod prelu;
mod relu;
mod rrelu;
mod silu;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum GeluApproximation {
    #[default]
    None,
    Tanh,
}

impl fmt::Display for GeluApproximation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeluApproximation::None => f.write_str("none"),
            GeluApproximation::Tanh => f.write_str("tanh"),
        }
    }
}

impl FromStr for GeluApproximation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(GeluApproximation::None),
            "tanh" => Ok(GeluApproximation::Tanh),
            other => Err(Error::precondition(
                "gelu",
                format!("approximation must be \"none\" or \"tanh\", got {other:?}"),
            )),
        }
    }
}

/// A fused primitive an operator maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedPrimitive {
    pub algorithm: Algorithm,
    pub propagation: Propagation,
    pub predicate: EligibilityPredicate,
    pub alpha: f32,
    pub beta: f32,
}

impl FusedPrimitive {
    fn forward(algorithm: Algorithm, alpha: f32) -> Self {
        Self {
            algorithm,
            propagation: Propagation::Forward,
            predicate: EligibilityPredicate::EltwiseForward,
            alpha,
            beta: 0.0,
        }
    }

    fn backward(algorithm: Algorithm, alpha: f32) -> Self {
        Self {
            algorithm,
            propagation: Propagation::Backward,
            predicate: EligibilityPredicate::EltwiseBackward,
            alpha,
            beta: 0.0,
        }
    }

    /// Integer data only has plain relu; a slope would be truncated.
    fn supports(&self, dtype: DType) -> bool {
        dtype.is_float() || (self.algorithm == Algorithm::EltwiseRelu && self.alpha == 0.0)
    }
}

/// How one call will be executed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ExecutionPlan {
    Fused(FusedPrimitive),
    Generic(LaunchPlan),
}

impl ExecutionPlan {
    pub fn is_fused(&self) -> bool {
        matches!(self, ExecutionPlan::Fused(_))
    }
}

/// Elementwise operators with a generic kernel.
///
/// Binary operators take `[self, other]` for threshold and
/// `[grad_output, self]` for the backward functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EltwiseOp {
    Relu,
    LeakyRelu { negative_slope: f64 },
    Threshold { threshold: f64, value: f64 },
    Gelu(GeluApproximation),
    Silu,
    Mish,
    Hardshrink { lambd: f64 },
    Hardswish,
    LeakyReluBackward { negative_slope: f64 },
    GeluBackward(GeluApproximation),
    SiluBackward,
    HardshrinkBackward { lambd: f64 },
    HardswishBackward,
    Mul,
}

impl EltwiseOp {
    pub fn name(&self) -> &'static str {
        match self {
            EltwiseOp::Relu => "relu",
            EltwiseOp::LeakyRelu { .. } => "leaky_relu",
            EltwiseOp::Threshold { .. } => "threshold",
            EltwiseOp::Gelu(_) => "gelu",
            EltwiseOp::Silu => "silu",
            EltwiseOp::Mish => "mish",
            EltwiseOp::Hardshrink { .. } => "hardshrink",
            EltwiseOp::Hardswish => "hardswish",
            EltwiseOp::LeakyReluBackward { .. } => "leaky_relu_backward",
            EltwiseOp::GeluBackward(_) => "gelu_backward",
            EltwiseOp::SiluBackward => "silu_backward",
            EltwiseOp::HardshrinkBackward { .. } => "hardshrink_backward",
            EltwiseOp::HardswishBackward => "hardswish_backward",
            EltwiseOp::Mul => "mul",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            EltwiseOp::Relu
            | EltwiseOp::LeakyRelu { .. }
            | EltwiseOp::Gelu(_)
            | EltwiseOp::Silu
            | EltwiseOp::Mish
            | EltwiseOp::Hardshrink { .. }
            | EltwiseOp::Hardswish => 1,
            _ => 2,
        }
    }

    /// Dtypes the generic kernel is instantiated for.
    pub fn generic_dtypes(&self, in_place: bool) -> &'static [DType] {
        match self {
            EltwiseOp::Relu if in_place => DType::ALL,
            EltwiseOp::Threshold { .. } => DType::ALL,
            EltwiseOp::SiluBackward => &[DType::F32, DType::F64, DType::BF16],
            _ => DType::FLOATING,
        }
    }

    pub fn fused(&self) -> Option<FusedPrimitive> {
        match *self {
            EltwiseOp::Relu => Some(FusedPrimitive::forward(Algorithm::EltwiseRelu, 0.0)),
            EltwiseOp::LeakyRelu { negative_slope } => {
                Some(FusedPrimitive::forward(Algorithm::EltwiseRelu, negative_slope as f32))
            }
            // relu backward of (src = self, diff_dst = other)
            EltwiseOp::Threshold { threshold, value } if threshold == 0.0 && value == 0.0 => {
                Some(FusedPrimitive::backward(Algorithm::EltwiseRelu, 0.0))
            }
            EltwiseOp::Gelu(approximate) => Some(FusedPrimitive::forward(gelu_algorithm(approximate), 0.0)),
            EltwiseOp::Mish => Some(FusedPrimitive::forward(Algorithm::EltwiseMish, 0.0)),
            EltwiseOp::GeluBackward(approximate) => {
                Some(FusedPrimitive::backward(gelu_algorithm(approximate), 0.0))
            }
            _ => None,
        }
    }

    /// `(src, diff_dst)` of a binary operator run as a fused backward.
    fn backward_roles<'a>(&self, first: &'a Tensor, second: &'a Tensor) -> (&'a Tensor, &'a Tensor) {
        match self {
            EltwiseOp::Threshold { .. } => (first, second),
            _ => (second, first),
        }
    }
}

fn gelu_algorithm(approximate: GeluApproximation) -> Algorithm {
    match approximate {
        GeluApproximation::None => Algorithm::EltwiseGeluErf,
        GeluApproximation::Tanh => Algorithm::EltwiseGeluTanh,
    }
}

/// Owns the queue, the primitive backend and the engine settings.
pub struct Engine {
    queue: Arc<dyn Queue>,
    backend: Arc<dyn PrimitiveBackend>,
    config: EngineConfig,
    opaque_format: OpaqueFormat,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.queue.device_id())
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Host queue plus the reference primitive backend.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let queue: Arc<dyn Queue> = Arc::new(HostQueue::new(&config)?);
        let backend: Arc<dyn PrimitiveBackend> = Arc::new(ReferenceBackend::new(Arc::clone(&queue)));
        Self::with_parts(config, queue, backend)
    }

    pub fn with_parts(
        config: EngineConfig,
        queue: Arc<dyn Queue>,
        backend: Arc<dyn PrimitiveBackend>,
    ) -> Result<Self> {
        let opaque_format = config.opaque_format()?;
        info!(
            "engine on device {} with backend {}, work group size {}, prefer fused for plain: {}",
            queue.device_id().ordinal(),
            backend.name(),
            queue.max_work_group_size(),
            config.prefer_fused_for_plain
        );
        Ok(Self {
            queue,
            backend,
            config,
            opaque_format,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &dyn Queue {
        self.queue.as_ref()
    }

    pub fn backend(&self) -> &dyn PrimitiveBackend {
        self.backend.as_ref()
    }

    /// A fresh generator, seeded from the config when it carries a seed.
    pub fn generator(&self) -> Generator {
        match self.config.seed {
            Some(seed) => Generator::new(seed),
            None => Generator::from_entropy(),
        }
    }

    /// Waits for everything submitted so far.
    pub fn synchronize(&self) -> Result<()> {
        self.queue.barrier()
    }

    pub fn to_plain(&self, tensor: &Tensor) -> Result<Tensor> {
        reorder::to_plain(self.queue(), tensor)
    }

    /// Reorders into the engine's opaque format.
    pub fn to_opaque(&self, tensor: &Tensor) -> Result<Tensor> {
        reorder::to_opaque(self.queue(), tensor, self.opaque_format)
    }

    pub fn contiguous(&self, tensor: &Tensor) -> Result<Tensor> {
        reorder::contiguous(self.queue(), tensor)
    }

    /// Chooses the execution path of `op` on `inputs`, writing to `out` when
    /// given. Does not run anything.
    pub fn plan(&self, op: &EltwiseOp, inputs: &[&Tensor], out: Option<&Tensor>) -> Result<ExecutionPlan> {
        self.check_call(op, inputs, out)?;
        let shape = output_shape(op, inputs)?;
        if let Some(out) = out {
            if out.shape() != shape.as_slice() {
                return Err(Error::ShapeMismatch {
                    op: op.name().to_string(),
                    lhs: out.shape().to_vec(),
                    rhs: shape,
                });
            }
            check_partial_overlap(op.name(), out, inputs)?;
        }
        if let Some(fused) = op.fused() {
            let descs: Vec<LayoutDescriptor> = inputs.iter().map(|t| LayoutDescriptor::of(t)).collect();
            let out_desc = out.map(LayoutDescriptor::of);
            let destination_ok = destination_eligible(op.name(), out_desc.as_ref(), descs[0].dtype)?;
            let wanted = self.config.prefer_fused_for_plain || descs.iter().any(|d| d.opaque);
            if wanted && destination_ok && fused.supports(descs[0].dtype) && fused.predicate.accepts(&descs) {
                return Ok(ExecutionPlan::Fused(fused));
            }
        }
        let numel: usize = shape.iter().product();
        Ok(ExecutionPlan::Generic(LaunchPlan::for_elements(
            numel,
            self.queue.max_work_group_size(),
        )))
    }

    /// Runs `op`, allocating the result or writing into `out`.
    pub fn eltwise(&self, op: &EltwiseOp, inputs: &[&Tensor], out: Option<&Tensor>) -> Result<Tensor> {
        match self.plan(op, inputs, out)? {
            ExecutionPlan::Fused(fused) => self.run_fused(op, &fused, inputs, out),
            ExecutionPlan::Generic(_) => self.run_generic(op, inputs, out, false),
        }
    }

    /// Runs `op` over `x` in place. A binary operator uses `x` as both
    /// operands. On the generic path an opaque `x` is first replaced by its
    /// plain reorder.
    pub fn eltwise_(&self, op: &EltwiseOp, x: &mut Tensor) -> Result<()> {
        let current = x.clone();
        let inputs = in_place_inputs(op, &current);
        match self.plan(op, &inputs, Some(&current))? {
            ExecutionPlan::Fused(fused) => {
                self.run_fused(op, &fused, &inputs, Some(&current))?;
            }
            ExecutionPlan::Generic(_) => {
                let target = if current.is_opaque() {
                    debug!("{}: in-place on opaque input, reordering to plain", op.name());
                    self.to_plain(&current)?
                } else {
                    current
                };
                let inputs = in_place_inputs(op, &target);
                self.run_generic(op, &inputs, Some(&target), true)?;
                *x = target;
            }
        }
        Ok(())
    }

    fn check_call(&self, op: &EltwiseOp, inputs: &[&Tensor], out: Option<&Tensor>) -> Result<()> {
        if inputs.len() != op.arity() {
            return Err(Error::precondition(
                op.name(),
                format!("expected {} operands, got {}", op.arity(), inputs.len()),
            ));
        }
        self.check_devices(op.name(), inputs.iter().copied().chain(out))?;
        match inputs {
            [a, b] if a.dtype() != b.dtype() => Err(Error::precondition(
                op.name(),
                format!("operands have different dtypes {} and {}", a.dtype(), b.dtype()),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_devices<'a>(&self, op: &str, tensors: impl IntoIterator<Item = &'a Tensor>) -> Result<()> {
        let device = self.queue.device_id();
        for tensor in tensors {
            if tensor.device() != device {
                return Err(Error::Device(format!(
                    "{op}: tensor on device {} but the queue runs on device {}",
                    tensor.device().ordinal(),
                    device.ordinal()
                )));
            }
        }
        Ok(())
    }

    fn fused_destination(&self, inputs: &[&Tensor], out: Option<&Tensor>) -> Tensor {
        if let Some(out) = out {
            return out.clone();
        }
        let first = inputs[0];
        match inputs.iter().find_map(|t| t.layout().opaque_format()) {
            Some(format) => Tensor::opaque_zeros(first.shape(), first.dtype(), format),
            None => Tensor::zeros(first.shape(), first.dtype()),
        }
        .on_device(first.device())
    }

    fn run_fused(
        &self,
        op: &EltwiseOp,
        fused: &FusedPrimitive,
        inputs: &[&Tensor],
        out: Option<&Tensor>,
    ) -> Result<Tensor> {
        let dst = self.fused_destination(inputs, out);
        match fused.propagation {
            Propagation::Forward => {
                self.backend.eltwise_forward(
                    fused.algorithm,
                    &Memory::of(inputs[0]),
                    &Memory::of(&dst),
                    fused.alpha,
                    fused.beta,
                )?;
            }
            Propagation::Backward => {
                let second = if inputs[1].shape() == inputs[0].shape() {
                    inputs[1].clone()
                } else {
                    inputs[1].expand(inputs[0].shape())?
                };
                let (src, diff_dst) = op.backward_roles(inputs[0], &second);
                self.backend.eltwise_backward(
                    fused.algorithm,
                    &Memory::of(diff_dst),
                    &Memory::of(src),
                    &Memory::of(&dst),
                    fused.alpha,
                    fused.beta,
                )?;
            }
        }
        debug!(
            "{}: fused {} {:?} on {:?}",
            op.name(),
            fused.algorithm,
            fused.propagation,
            inputs[0].shape()
        );
        Ok(dst)
    }

    fn run_generic(&self, op: &EltwiseOp, inputs: &[&Tensor], out: Option<&Tensor>, in_place: bool) -> Result<Tensor> {
        let name = op.name();
        let dtype = inputs[0].dtype();
        if !op.generic_dtypes(in_place).contains(&dtype) {
            return Err(Error::unsupported_dtype(name, dtype));
        }
        let shape = output_shape(op, inputs)?;
        let operands = inputs
            .iter()
            .map(|t| {
                let plain = self.to_plain(t)?;
                if plain.shape() == shape.as_slice() {
                    Ok(plain)
                } else {
                    plain.expand(&shape)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let dest = Destination::resolve(name, out, &shape, dtype, self.queue.device_id())?;
        self.launch_generic(op, dest.kernel_target(), &operands)?;
        debug!("{name}: generic kernel on {shape:?} {dtype}");
        dest.finish(self.queue())
    }

    fn launch_generic(&self, op: &EltwiseOp, dst: &Tensor, operands: &[Tensor]) -> Result<()> {
        let q = self.queue();
        let name = op.name();
        let dtype = dst.dtype();
        match *op {
            EltwiseOp::Relu => {
                dispatch_all_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::relu::<T>))
            }
            EltwiseOp::LeakyRelu { negative_slope } => dispatch_floating_types!(dtype, name, |T| {
                let slope = acc::<T>(negative_slope);
                unary::<T, _>(q, name, dst, &operands[0], move |x| functors::leaky_relu(x, slope))
            }),
            EltwiseOp::Threshold { threshold, value } => dispatch_all_types!(dtype, name, |T| {
                let (threshold, value) = (<T as Element>::from_f64(threshold), <T as Element>::from_f64(value));
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], move |x, other| {
                    functors::threshold(x, other, threshold, value)
                })
            }),
            EltwiseOp::Gelu(GeluApproximation::None) => {
                dispatch_floating_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::gelu_erf::<T>))
            }
            EltwiseOp::Gelu(GeluApproximation::Tanh) => {
                dispatch_floating_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::gelu_tanh::<T>))
            }
            EltwiseOp::Silu => {
                dispatch_floating_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::silu::<T>))
            }
            EltwiseOp::Mish => {
                dispatch_floating_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::mish::<T>))
            }
            EltwiseOp::Hardshrink { lambd } => dispatch_floating_types!(dtype, name, |T| {
                let lambd = <T as Element>::from_f64(lambd).to_acc();
                unary::<T, _>(q, name, dst, &operands[0], move |x| functors::hardshrink(x, lambd))
            }),
            EltwiseOp::Hardswish => {
                dispatch_floating_types!(dtype, name, |T| unary::<T, _>(q, name, dst, &operands[0], functors::hardswish::<T>))
            }
            EltwiseOp::LeakyReluBackward { negative_slope } => dispatch_floating_types!(dtype, name, |T| {
                let slope = acc::<T>(negative_slope);
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], move |dy, x| {
                    functors::leaky_relu_backward(dy, x, slope)
                })
            }),
            EltwiseOp::GeluBackward(GeluApproximation::None) => dispatch_floating_types!(dtype, name, |T| {
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], functors::gelu_erf_backward::<T>)
            }),
            EltwiseOp::GeluBackward(GeluApproximation::Tanh) => dispatch_floating_types!(dtype, name, |T| {
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], functors::gelu_tanh_backward::<T>)
            }),
            EltwiseOp::SiluBackward => dispatch_types!(
                dtype,
                name,
                [F32 => f32, F64 => f64, BF16 => ::half::bf16],
                |T| binary::<T, _>(q, name, dst, &operands[0], &operands[1], functors::silu_backward::<T>)
            ),
            EltwiseOp::HardshrinkBackward { lambd } => dispatch_floating_types!(dtype, name, |T| {
                let lambd = <T as Element>::from_f64(lambd).to_acc();
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], move |dy, x| {
                    functors::hardshrink_backward(dy, x, lambd)
                })
            }),
            EltwiseOp::HardswishBackward => dispatch_floating_types!(dtype, name, |T| {
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], functors::hardswish_backward::<T>)
            }),
            EltwiseOp::Mul => dispatch_floating_types!(dtype, name, |T| {
                binary::<T, _>(q, name, dst, &operands[0], &operands[1], functors::mul::<T>)
            }),
        }
    }
}

fn in_place_inputs<'a>(op: &EltwiseOp, x: &'a Tensor) -> Vec<&'a Tensor> {
    vec![x; op.arity()]
}

/// Result shape: the input shape, or the broadcast of both operands.
fn output_shape(op: &EltwiseOp, inputs: &[&Tensor]) -> Result<Vec<usize>> {
    match inputs {
        [x] => Ok(x.shape().to_vec()),
        [a, b] => broadcast_shape(op.name(), a.shape(), b.shape()),
        _ => Err(Error::precondition(op.name(), "expected one or two operands")),
    }
}
