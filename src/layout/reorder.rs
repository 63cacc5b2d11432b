//! Plain <-> opaque coercion.

use log::debug;

use super::{Layout, OpaqueFormat};
use crate::core::tensor::Tensor;
use crate::device::Queue;
use crate::error::Result;
use crate::kernels::elementwise::copy;

/// Returns `tensor` itself when already plain, otherwise a dense plain copy.
pub fn to_plain(queue: &dyn Queue, tensor: &Tensor) -> Result<Tensor> {
    if tensor.layout().is_plain() {
        return Ok(tensor.clone());
    }
    debug!("reorder {:?} {:?} to plain", tensor.shape(), tensor.layout());
    let plain = Tensor::zeros(tensor.shape(), tensor.dtype()).on_device(tensor.device());
    copy(queue, &plain, tensor)?;
    Ok(plain)
}

/// Returns `tensor` itself when already in `format`, otherwise a copy in it.
pub fn to_opaque(queue: &dyn Queue, tensor: &Tensor, format: OpaqueFormat) -> Result<Tensor> {
    if tensor.layout() == Layout::Opaque(format) {
        return Ok(tensor.clone());
    }
    debug!(
        "reorder {:?} to {}",
        tensor.shape(),
        format.tag(tensor.rank())
    );
    let blocked = Tensor::opaque_zeros(tensor.shape(), tensor.dtype(), format).on_device(tensor.device());
    copy(queue, &blocked, tensor)?;
    Ok(blocked)
}

/// Dense plain tensor with the same values; `tensor` itself when it already
/// is one.
pub fn contiguous(queue: &dyn Queue, tensor: &Tensor) -> Result<Tensor> {
    if tensor.layout().is_plain() && tensor.is_contiguous() {
        return Ok(tensor.clone());
    }
    let dense = Tensor::zeros(tensor.shape(), tensor.dtype()).on_device(tensor.device());
    copy(queue, &dense, tensor)?;
    Ok(dense)
}
