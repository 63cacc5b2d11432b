//! Result buffers of the generic path.
//!
//! A call either allocates its result, writes into a caller-supplied tensor,
//! or writes in place over its first input. Kernels always write dense
//! memory: a strided destination gets a dense staging buffer that is copied
//! back through the caller's view once the kernel has run.

use log::debug;

use crate::core::tensor::Tensor;
use crate::core::types::DType;
use crate::device::{DeviceId, Queue};
use crate::error::{Error, Result};
use crate::kernels::elementwise::copy;

/// An output may share memory with an input only as the very same view.
/// Shifted or restrided windows of one buffer would let lanes read elements
/// another lane already wrote.
pub(crate) fn check_partial_overlap(op: &str, out: &Tensor, inputs: &[&Tensor]) -> Result<()> {
    if inputs.iter().any(|t| out.same_storage(t) && !out.is_same_view(t)) {
        return Err(Error::precondition(
            op,
            "some elements of the input tensor and the written-to tensor refer to a single memory location",
        ));
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Destination {
    target: Tensor,
    staging: Option<Tensor>,
}

impl Destination {
    pub(crate) fn resolve(
        op: &str,
        out: Option<&Tensor>,
        shape: &[usize],
        dtype: DType,
        device: DeviceId,
    ) -> Result<Self> {
        let Some(out) = out else {
            return Ok(Self {
                target: Tensor::zeros(shape, dtype).on_device(device),
                staging: None,
            });
        };
        if out.is_opaque() {
            return Err(Error::LayoutConflict { op: op.to_string() });
        }
        if out.dtype() != dtype {
            return Err(Error::precondition(
                op,
                format!("result type {dtype} can't be written to an output of type {}", out.dtype()),
            ));
        }
        if out.shape() != shape {
            return Err(Error::ShapeMismatch {
                op: op.to_string(),
                lhs: out.shape().to_vec(),
                rhs: shape.to_vec(),
            });
        }
        if out.has_internal_overlap() {
            return Err(Error::precondition(
                op,
                "output has internal overlap, more than one element refers to the same memory location",
            ));
        }
        let staging = if out.is_contiguous() {
            None
        } else {
            debug!("{op}: staging {shape:?} result through a dense buffer");
            Some(Tensor::zeros(shape, dtype).on_device(device))
        };
        Ok(Self {
            target: out.clone(),
            staging,
        })
    }

    /// The tensor kernels write to.
    pub(crate) fn kernel_target(&self) -> &Tensor {
        self.staging.as_ref().unwrap_or(&self.target)
    }

    pub(crate) fn is_staged(&self) -> bool {
        self.staging.is_some()
    }

    /// Copies a staged result back and returns the caller-visible tensor.
    pub(crate) fn finish(self, queue: &dyn Queue) -> Result<Tensor> {
        if let Some(staging) = &self.staging {
            queue.barrier()?;
            copy(queue, &self.target, staging)?;
        }
        Ok(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::device::HostQueue;

    #[test]
    fn test_allocates_when_no_output() {
        let dest = Destination::resolve("relu", None, &[2, 2], DType::F16, DeviceId::default()).unwrap();
        assert!(!dest.is_staged());
        assert_eq!(dest.kernel_target().shape(), &[2, 2]);
        assert_eq!(dest.kernel_target().dtype(), DType::F16);
    }

    #[test]
    fn test_strided_output_is_staged_and_copied_back() {
        let q = HostQueue::new(&EngineConfig::default()).unwrap();
        let base = Tensor::zeros(&[2, 3], DType::F32);
        let view = base.transpose(0, 1).unwrap();
        let dest = Destination::resolve("fill", Some(&view), &[3, 2], DType::F32, DeviceId::default()).unwrap();
        assert!(dest.is_staged());
        let staged = Tensor::from_vec(vec![1f32, 2., 3., 4., 5., 6.], &[3, 2]).unwrap();
        copy(&q, dest.kernel_target(), &staged).unwrap();
        let result = dest.finish(&q).unwrap();
        assert!(result.same_storage(&base));
        assert_eq!(base.to_vec::<f32>().unwrap(), vec![1., 3., 5., 2., 4., 6.]);
    }

    #[test]
    fn test_rejected_outputs() {
        let dev = DeviceId::default();
        let fmt = crate::layout::OpaqueFormat::blocked(4).unwrap();
        let opaque = Tensor::opaque_zeros(&[4], DType::F32, fmt);
        assert!(matches!(
            Destination::resolve("gelu", Some(&opaque), &[4], DType::F32, dev),
            Err(Error::LayoutConflict { .. })
        ));
        let wrong_dtype = Tensor::zeros(&[4], DType::F64);
        assert!(Destination::resolve("gelu", Some(&wrong_dtype), &[4], DType::F32, dev).is_err());
        let broadcast = Tensor::zeros(&[1], DType::F32).expand(&[4]).unwrap();
        assert!(Destination::resolve("gelu", Some(&broadcast), &[4], DType::F32, dev).is_err());
    }

    #[test]
    fn test_partial_overlap() {
        let base = Tensor::zeros(&[8], DType::F32);
        let x = base.narrow(0, 0, 6).unwrap();
        let shifted = base.narrow(0, 2, 6).unwrap();
        assert!(matches!(
            check_partial_overlap("relu", &shifted, &[&x]),
            Err(Error::Precondition { .. })
        ));
        assert!(check_partial_overlap("relu", &x, &[&x.clone()]).is_ok());
        assert!(check_partial_overlap("relu", &Tensor::zeros(&[6], DType::F32), &[&x]).is_ok());
    }
}
