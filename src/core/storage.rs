//! Device memory owned by tensors.
//!
//! Memory is written by kernels through raw lane pointers, never through
//! `&mut` borrows, so several tensor views can alias one allocation the way
//! device buffers do.

use std::cell::UnsafeCell;

use half::{bf16, f16};

use super::types::{DType, Element};

/// A fixed-size allocation of `len` elements.
#[derive(Debug)]
pub struct DeviceMemory<T> {
    cells: Box<[UnsafeCell<T>]>,
}

impl<T> DeviceMemory<T> {
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            cells: data.into_iter().map(UnsafeCell::new).collect(),
        }
    }

    /// Returns the number of elements this memory holds.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Base pointer used by kernels. Writes through it must target disjoint
    /// elements across lanes.
    pub fn as_ptr(&self) -> *mut T {
        // UnsafeCell<T> has the same layout as T
        self.cells.as_ptr() as *mut T
    }
}

impl<T: Element> DeviceMemory<T> {
    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![T::zero(); len])
    }

    /// Host readback of a single element.
    pub fn read(&self, index: usize) -> T {
        assert!(index < self.len(), "index {index} out of bounds for {}", self.len());
        unsafe { *self.cells[index].get() }
    }
}

// Kernels on different lanes touch disjoint elements; ordering between
// submissions is the queue's job.
unsafe impl<T: Send> Send for DeviceMemory<T> {}
unsafe impl<T: Send> Sync for DeviceMemory<T> {}

/// Dtype-tagged storage backing a tensor.
#[derive(Debug)]
pub enum Storage {
    U8(DeviceMemory<u8>),
    I8(DeviceMemory<i8>),
    I32(DeviceMemory<i32>),
    BF16(DeviceMemory<bf16>),
    F16(DeviceMemory<f16>),
    F32(DeviceMemory<f32>),
    F64(DeviceMemory<f64>),
}

impl Storage {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::U8 => Self::U8(DeviceMemory::zeros(len)),
            DType::I8 => Self::I8(DeviceMemory::zeros(len)),
            DType::I32 => Self::I32(DeviceMemory::zeros(len)),
            DType::BF16 => Self::BF16(DeviceMemory::zeros(len)),
            DType::F16 => Self::F16(DeviceMemory::zeros(len)),
            DType::F32 => Self::F32(DeviceMemory::zeros(len)),
            DType::F64 => Self::F64(DeviceMemory::zeros(len)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::U8(_) => DType::U8,
            Self::I8(_) => DType::I8,
            Self::I32(_) => DType::I32,
            Self::BF16(_) => DType::BF16,
            Self::F16(_) => DType::F16,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(m) => m.len(),
            Self::I8(m) => m.len(),
            Self::I32(m) => m.len(),
            Self::BF16(m) => m.len(),
            Self::F16(m) => m.len(),
            Self::F32(m) => m.len(),
            Self::F64(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
