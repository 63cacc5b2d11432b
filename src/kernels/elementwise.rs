//! Generic map / zip launchers over tensors of one dtype.
//!
//! Dense plain operands are addressed as `offset + i`; everything else
//! (strided views, broadcast views, opaque blocks) goes through its memory
//! descriptor. Lanes never write the same physical element twice, so the
//! destination must not have internal overlap.

use crate::core::storage::Storage;
use crate::core::tensor::Tensor;
use crate::core::types::Element;
use crate::device::{DevicePtr, Queue};
use crate::error::{Error, Result};
use crate::kernels::dispatch::dispatch_all_types;
use crate::kernels::launch::launch_elements;
use crate::layout::MemoryDesc;

#[derive(Debug, Clone)]
enum Addressing {
    Dense(usize),
    Mapped(MemoryDesc),
}

/// Lane-side handle on one kernel argument.
#[derive(Debug, Clone)]
pub(crate) struct Operand<T> {
    ptr: DevicePtr<T>,
    addressing: Addressing,
}

impl<T: Element> Operand<T> {
    pub(crate) fn new(tensor: &Tensor, op: &str) -> Result<Self> {
        let ptr = DevicePtr::of(tensor, op)?;
        let addressing = if tensor.layout().is_plain() && tensor.is_contiguous() {
            Addressing::Dense(tensor.offset())
        } else {
            Addressing::Mapped(tensor.desc())
        };
        Ok(Self { ptr, addressing })
    }

    /// Operand addressed purely through `desc`, for callers that hold a
    /// memory descriptor rather than a tensor.
    pub(crate) fn mapped(storage: &Storage, desc: &MemoryDesc, op: &str) -> Result<Self> {
        Ok(Self {
            ptr: DevicePtr::in_storage(storage, op)?,
            addressing: Addressing::Mapped(desc.clone()),
        })
    }

    #[inline]
    fn index(&self, linear: usize) -> usize {
        match &self.addressing {
            Addressing::Dense(offset) => offset + linear,
            Addressing::Mapped(desc) => desc.physical_offset(linear),
        }
    }

    /// # Safety
    /// `linear` must be below the operand's element count.
    #[inline]
    pub(crate) unsafe fn load(&self, linear: usize) -> T {
        unsafe { self.ptr.load(self.index(linear)) }
    }

    /// # Safety
    /// `linear` must be below the element count and written by one lane only.
    #[inline]
    pub(crate) unsafe fn store(&self, linear: usize, value: T) {
        unsafe { self.ptr.store(self.index(linear), value) }
    }
}

fn check_same_shape(op: &str, dst: &Tensor, src: &Tensor) -> Result<()> {
    if dst.shape() != src.shape() {
        return Err(Error::ShapeMismatch {
            op: op.to_string(),
            lhs: dst.shape().to_vec(),
            rhs: src.shape().to_vec(),
        });
    }
    Ok(())
}

/// `dst[i] = f(src[i])`.
pub(crate) fn unary<T, F>(queue: &dyn Queue, op: &str, dst: &Tensor, src: &Tensor, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T) -> T + Sync,
{
    check_same_shape(op, dst, src)?;
    let out = Operand::<T>::new(dst, op)?;
    let x = Operand::<T>::new(src, op)?;
    launch_elements(queue, op, dst.elem_count(), |i| unsafe { out.store(i, f(x.load(i))) })
}

/// `dst[i] = f(a[i], b[i])`.
pub(crate) fn binary<T, F>(queue: &dyn Queue, op: &str, dst: &Tensor, a: &Tensor, b: &Tensor, f: F) -> Result<()>
where
    T: Element,
    F: Fn(T, T) -> T + Sync,
{
    check_same_shape(op, dst, a)?;
    check_same_shape(op, dst, b)?;
    let out = Operand::<T>::new(dst, op)?;
    let lhs = Operand::<T>::new(a, op)?;
    let rhs = Operand::<T>::new(b, op)?;
    launch_elements(queue, op, dst.elem_count(), |i| unsafe {
        out.store(i, f(lhs.load(i), rhs.load(i)))
    })
}

/// Element copy between any two layouts of equal shape and dtype.
pub(crate) fn copy(queue: &dyn Queue, dst: &Tensor, src: &Tensor) -> Result<()> {
    if dst.dtype() != src.dtype() {
        return Err(Error::precondition(
            "copy",
            format!("dtype mismatch: {} <- {}", dst.dtype(), src.dtype()),
        ));
    }
    dispatch_all_types!(dst.dtype(), "copy", |T| unary::<T, _>(queue, "copy", dst, src, |v| v))
}
