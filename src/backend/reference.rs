use std::sync::{Arc, Mutex};

use log::debug;
use serde::Serialize;

use super::{Algorithm, Memory, PrimitiveBackend, Propagation};
use crate::core::types::{Element, FloatElement};
use crate::device::Queue;
use crate::error::{Error, Result};
use crate::kernels::dispatch::{dispatch_floating_types, dispatch_types};
use crate::kernels::elementwise::Operand;
use crate::kernels::functors::{
    acc, gelu_erf, gelu_erf_backward, gelu_tanh, gelu_tanh_backward, leaky_relu, leaky_relu_backward, mish,
    mul, relu, relu_backward,
};
use crate::kernels::launch::launch_elements;

/// One recorded primitive execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub algorithm: Algorithm,
    pub propagation: Propagation,
}

/// Layout-aware primitive backend running on the engine's queue.
///
/// Every element is addressed through its memory descriptor, so blocked
/// sources and destinations are read and written in place. Executions are
/// recorded for inspection.
pub struct ReferenceBackend {
    queue: Arc<dyn Queue>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ReferenceBackend {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self {
            queue,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        match self.invocations.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, algorithm: Algorithm, propagation: Propagation) {
        debug!("{} {algorithm} {propagation:?}", self.name());
        match self.invocations.lock() {
            Ok(mut log) => log.push(Invocation { algorithm, propagation }),
            Err(poisoned) => poisoned.into_inner().push(Invocation { algorithm, propagation }),
        }
    }

    fn fail(&self, msg: impl Into<String>) -> Error {
        Error::Backend {
            backend: self.name().to_string(),
            msg: msg.into(),
        }
    }

    fn check_same(&self, lhs: &Memory, rhs: &Memory) -> Result<()> {
        if lhs.desc.dims() != rhs.desc.dims() {
            return Err(self.fail(format!(
                "descriptor dims {:?} and {:?} differ",
                lhs.desc.dims(),
                rhs.desc.dims()
            )));
        }
        if lhs.desc.dtype() != rhs.desc.dtype() {
            return Err(self.fail(format!(
                "descriptor dtypes {} and {} differ",
                lhs.desc.dtype(),
                rhs.desc.dtype()
            )));
        }
        Ok(())
    }
}

fn map_unary<T, F>(queue: &dyn Queue, op: &str, src: &Memory, dst: &Memory, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T) -> T + Sync,
{
    let x = Operand::<T>::mapped(&src.storage, &src.desc, op)?;
    let y = Operand::<T>::mapped(&dst.storage, &dst.desc, op)?;
    launch_elements(queue, op, src.desc.elem_count(), |i| unsafe { y.store(i, f(x.load(i))) })
}

fn map_binary<T, F>(queue: &dyn Queue, op: &str, a: &Memory, b: &Memory, dst: &Memory, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T, T) -> T + Sync,
{
    let lhs = Operand::<T>::mapped(&a.storage, &a.desc, op)?;
    let rhs = Operand::<T>::mapped(&b.storage, &b.desc, op)?;
    let y = Operand::<T>::mapped(&dst.storage, &dst.desc, op)?;
    launch_elements(queue, op, dst.desc.elem_count(), |i| unsafe {
        y.store(i, f(lhs.load(i), rhs.load(i)))
    })
}

// Prelu never reaches the value functions; it is rejected before launch.
#[inline]
fn forward_value<T: FloatElement>(algorithm: Algorithm, x: T, alpha: f32) -> T {
    match algorithm {
        Algorithm::EltwiseRelu if alpha == 0.0 => relu(x),
        Algorithm::EltwiseRelu => leaky_relu(x, acc::<T>(alpha as f64)),
        Algorithm::EltwiseGeluTanh => gelu_tanh(x),
        Algorithm::EltwiseGeluErf => gelu_erf(x),
        Algorithm::EltwiseMish => mish(x),
        Algorithm::Prelu => x,
    }
}

#[inline]
fn backward_value<T: FloatElement>(algorithm: Algorithm, dy: T, x: T, alpha: f32) -> T {
    match algorithm {
        Algorithm::EltwiseRelu if alpha == 0.0 => relu_backward(dy, x),
        Algorithm::EltwiseRelu => leaky_relu_backward(dy, x, acc::<T>(alpha as f64)),
        Algorithm::EltwiseGeluTanh => gelu_tanh_backward(dy, x),
        Algorithm::EltwiseGeluErf => gelu_erf_backward(dy, x),
        Algorithm::EltwiseMish | Algorithm::Prelu => dy,
    }
}

impl PrimitiveBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn eltwise_forward(&self, algorithm: Algorithm, src: &Memory, dst: &Memory, alpha: f32, _beta: f32) -> Result<()> {
        self.check_same(src, dst)?;
        if algorithm == Algorithm::Prelu {
            return Err(self.fail("prelu is not an eltwise algorithm"));
        }
        let dtype = src.desc.dtype();
        let q = self.queue.as_ref();
        let op = "eltwise_forward";
        if dtype.is_float() {
            self.record(algorithm, Propagation::Forward);
            dispatch_floating_types!(dtype, op, |T| {
                map_unary::<T, _>(q, op, src, dst, |x| forward_value(algorithm, x, alpha))
            })
        } else if algorithm == Algorithm::EltwiseRelu && alpha == 0.0 {
            self.record(algorithm, Propagation::Forward);
            dispatch_types!(dtype, op, [U8 => u8, I8 => i8, I32 => i32], |T| {
                map_unary::<T, _>(q, op, src, dst, relu::<T>)
            })
        } else {
            Err(self.fail(format!("{algorithm} with alpha {alpha} does not support {dtype}")))
        }
    }

    fn eltwise_backward(
        &self,
        algorithm: Algorithm,
        diff_dst: &Memory,
        src: &Memory,
        diff_src: &Memory,
        alpha: f32,
        _beta: f32,
    ) -> Result<()> {
        self.check_same(src, diff_src)?;
        self.check_same(diff_dst, diff_src)?;
        if matches!(algorithm, Algorithm::EltwiseMish | Algorithm::Prelu) {
            return Err(self.fail(format!("no backward primitive for {algorithm}")));
        }
        let dtype = src.desc.dtype();
        if !dtype.is_float() {
            return Err(self.fail(format!("{algorithm} backward does not support {dtype}")));
        }
        self.record(algorithm, Propagation::Backward);
        let q = self.queue.as_ref();
        let op = "eltwise_backward";
        dispatch_floating_types!(dtype, op, |T| {
            map_binary::<T, _>(q, op, diff_dst, src, diff_src, |dy, x| backward_value(algorithm, dy, x, alpha))
        })
    }

    fn prelu_forward(&self, src: &Memory, weights: &Memory, dst: &Memory) -> Result<()> {
        self.check_same(src, dst)?;
        let dtype = src.desc.dtype();
        if weights.desc.dtype() != dtype || !dtype.is_float() {
            return Err(self.fail(format!(
                "prelu needs matching floating dtypes, got {dtype} and {}",
                weights.desc.dtype()
            )));
        }
        let dims = src.desc.dims();
        let count = weights.desc.elem_count();
        let channels = if dims.len() > 1 { dims[1] } else { 1 };
        if count != 1 && count != channels {
            return Err(self.fail(format!("{count} weights for {channels} channels")));
        }
        let inner: usize = dims.iter().skip(2).product();
        self.record(Algorithm::Prelu, Propagation::Forward);

        let q = self.queue.as_ref();
        let op = "prelu_forward";
        dispatch_floating_types!(dtype, op, |T| {
            let x = Operand::<T>::mapped(&src.storage, &src.desc, op)?;
            let w = Operand::<T>::mapped(&weights.storage, &weights.desc, op)?;
            let y = Operand::<T>::mapped(&dst.storage, &dst.desc, op)?;
            launch_elements(q, op, src.desc.elem_count(), |i| unsafe {
                let v: T = x.load(i);
                let slot = if count == 1 { 0 } else { (i / inner) % channels };
                y.store(i, if v > T::zero() { v } else { mul(w.load(slot), v) });
            })
        })
    }
}
