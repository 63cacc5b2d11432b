use std::sync::Arc;

use super::storage::Storage;
use super::types::{DType, Element};
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::kernels::dispatch::dispatch_all_types;
use crate::layout::{Layout, MemoryDesc, OpaqueFormat};

/// Row-major strides for a dense tensor of `shape`.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1].max(1);
    }
    strides
}

/// A view onto device storage.
///
/// Cloning is cheap and yields another handle to the same memory. Views made
/// by `narrow`, `transpose`, `permute` or `expand` share storage with their
/// base and report `is_view() == true`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    layout: Layout,
    device: DeviceId,
    is_view: bool,
}

impl Tensor {
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::precondition(
                "from_vec",
                format!("shape {shape:?} holds {numel} elements, got {}", data.len()),
            ));
        }
        Ok(Self::from_storage(T::into_storage(data), shape))
    }

    /// Builds a tensor of `dtype` from host scalars, converting each value.
    pub fn from_f64_slice(data: &[f64], shape: &[usize], dtype: DType) -> Result<Self> {
        dispatch_all_types!(dtype, "from_f64_slice", |T| {
            Self::from_vec(data.iter().map(|&v| T::from_f64(v)).collect::<Vec<T>>(), shape)
        })
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self::from_storage(Storage::zeros(dtype, numel), shape)
    }

    /// A fresh plain, contiguous tensor with the same shape, dtype and device.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shape, self.dtype()).on_device(self.device)
    }

    pub(crate) fn opaque_zeros(shape: &[usize], dtype: DType, format: OpaqueFormat) -> Self {
        let storage = Storage::zeros(dtype, format.physical_len(shape));
        Self {
            storage: Arc::new(storage),
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset: 0,
            layout: Layout::Opaque(format),
            device: DeviceId::default(),
            is_view: false,
        }
    }

    fn from_storage(storage: Storage, shape: &[usize]) -> Self {
        Self {
            storage: Arc::new(storage),
            shape: shape.to_vec(),
            strides: contiguous_strides(shape),
            offset: 0,
            layout: Layout::Plain,
            device: DeviceId::default(),
            is_view: false,
        }
    }

    pub fn on_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_opaque(&self) -> bool {
        !self.layout.is_plain()
    }

    pub fn is_view(&self) -> bool {
        self.is_view
    }

    pub(crate) fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Same storage, offset, shape, strides and layout.
    pub fn is_same_view(&self, other: &Tensor) -> bool {
        self.same_storage(other)
            && self.offset == other.offset
            && self.shape == other.shape
            && self.strides == other.strides
            && self.layout == other.layout
    }

    pub fn desc(&self) -> MemoryDesc {
        MemoryDesc::of(self)
    }

    /// Dense row-major check; size-1 dimensions may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        if self.is_opaque() {
            return true;
        }
        let order: Vec<usize> = (0..self.rank()).collect();
        self.is_dense_in_order(&order)
    }

    /// Channels-last density for 3-d, 4-d and 5-d plain tensors.
    pub fn is_channels_last(&self) -> bool {
        let rank = self.rank();
        if self.is_opaque() || !(3..=5).contains(&rank) {
            return false;
        }
        let mut order = vec![0];
        order.extend(2..rank);
        order.push(1);
        self.is_dense_in_order(&order)
    }

    /// `order` lists dimensions from outermost to innermost.
    fn is_dense_in_order(&self, order: &[usize]) -> bool {
        if self.elem_count() == 0 {
            return true;
        }
        let mut expected = 1;
        for &d in order.iter().rev() {
            if self.shape[d] == 1 {
                continue;
            }
            if self.strides[d] != expected {
                return false;
            }
            expected *= self.shape[d];
        }
        true
    }

    /// True when distinct logical elements may share a memory location.
    pub fn has_internal_overlap(&self) -> bool {
        !self.is_opaque()
            && self
                .shape
                .iter()
                .zip(self.strides.iter())
                .any(|(&size, &stride)| size > 1 && stride == 0)
    }

    fn require_plain(&self, op: &str) -> Result<()> {
        if self.is_opaque() {
            return Err(Error::precondition(op, "view of an opaque tensor, reorder to plain first"));
        }
        Ok(())
    }

    fn view(&self, shape: Vec<usize>, strides: Vec<usize>, offset: usize) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            shape,
            strides,
            offset,
            layout: Layout::Plain,
            device: self.device,
            is_view: true,
        }
    }

    /// Slice `len` elements of `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        self.require_plain("narrow")?;
        if dim >= self.rank() || start + len > self.shape[dim] {
            return Err(Error::precondition(
                "narrow",
                format!("cannot take {start}..{} of dim {dim} in {:?}", start + len, self.shape),
            ));
        }
        let mut shape = self.shape.clone();
        shape[dim] = len;
        Ok(self.view(shape, self.strides.clone(), self.offset + start * self.strides[dim]))
    }

    pub fn transpose(&self, d0: usize, d1: usize) -> Result<Self> {
        if d0 >= self.rank() || d1 >= self.rank() {
            return Err(Error::precondition(
                "transpose",
                format!("dims ({d0}, {d1}) out of range for rank {}", self.rank()),
            ));
        }
        let mut dims: Vec<usize> = (0..self.rank()).collect();
        dims.swap(d0, d1);
        self.permute(&dims)
    }

    pub fn permute(&self, dims: &[usize]) -> Result<Self> {
        self.require_plain("permute")?;
        let mut seen = vec![false; self.rank()];
        if dims.len() != self.rank() || dims.iter().any(|&d| d >= self.rank() || std::mem::replace(&mut seen[d], true)) {
            return Err(Error::precondition(
                "permute",
                format!("{dims:?} is not a permutation of {} dims", self.rank()),
            ));
        }
        let shape = dims.iter().map(|&d| self.shape[d]).collect();
        let strides = dims.iter().map(|&d| self.strides[d]).collect();
        Ok(self.view(shape, strides, self.offset))
    }

    /// Broadcast view: size-1 (or missing leading) dimensions get stride 0.
    pub fn expand(&self, shape: &[usize]) -> Result<Self> {
        self.require_plain("expand")?;
        if shape == self.shape.as_slice() {
            return Ok(self.clone());
        }
        if shape.len() < self.rank() {
            return Err(Error::ShapeMismatch {
                op: "expand".to_string(),
                lhs: self.shape.clone(),
                rhs: shape.to_vec(),
            });
        }
        let lead = shape.len() - self.rank();
        let mut strides = vec![0; shape.len()];
        for (d, &target) in shape.iter().enumerate().skip(lead) {
            let src = d - lead;
            if self.shape[src] == target {
                strides[d] = self.strides[src];
            } else if self.shape[src] != 1 {
                return Err(Error::ShapeMismatch {
                    op: "expand".to_string(),
                    lhs: self.shape.clone(),
                    rhs: shape.to_vec(),
                });
            }
        }
        Ok(self.view(shape.to_vec(), strides, self.offset))
    }

    /// Host readback in logical row-major order. Opaque tensors must be
    /// reordered to plain first.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.require_plain("to_vec")?;
        let mem = T::memory(&self.storage).ok_or_else(|| {
            Error::precondition("to_vec", format!("tensor holds {}, requested {}", self.dtype(), T::DTYPE))
        })?;
        let desc = self.desc();
        Ok((0..self.elem_count()).map(|i| mem.read(desc.physical_offset(i))).collect())
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        dispatch_all_types!(self.dtype(), "to_f64_vec", |T| {
            Ok(self.to_vec::<T>()?.into_iter().map(|v| v.to_f64()).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_views_share_storage() {
        let t = Tensor::from_vec((0..12).map(|v| v as f32).collect(), &[3, 4]).unwrap();
        let col = t.narrow(1, 1, 2).unwrap();
        assert!(col.is_view());
        assert!(col.same_storage(&t));
        assert!(!col.is_contiguous());
        assert_eq!(col.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_transpose_readback() {
        let t = Tensor::from_vec(vec![1f32, 2., 3., 4., 5., 6.], &[2, 3]).unwrap();
        let tt = t.transpose(0, 1).unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.to_vec::<f32>().unwrap(), vec![1., 4., 2., 5., 3., 6.]);
    }

    #[test]
    fn test_channels_last_detection() {
        let nhwc = Tensor::zeros(&[2, 4, 4, 3], DType::F32);
        let nchw_view = nhwc.permute(&[0, 3, 1, 2]).unwrap();
        assert!(nchw_view.is_channels_last());
        assert!(!nchw_view.is_contiguous());
        assert!(!Tensor::zeros(&[2, 3, 4, 4], DType::F32).is_channels_last());
    }

    #[test]
    fn test_expand_broadcasts_with_zero_stride() {
        let row = Tensor::from_vec(vec![1f32, 2., 3.], &[3]).unwrap();
        let grid = row.expand(&[2, 3]).unwrap();
        assert_eq!(grid.strides(), &[0, 1]);
        assert!(grid.has_internal_overlap());
        assert_eq!(grid.to_vec::<f32>().unwrap(), vec![1., 2., 3., 1., 2., 3.]);
        assert!(row.expand(&[2, 4]).is_err());
    }

    #[test]
    fn test_from_vec_checks_element_count() {
        assert!(Tensor::from_vec(vec![1f32, 2.], &[3]).is_err());
    }

    #[test]
    fn test_to_vec_rejects_wrong_dtype() {
        let t = Tensor::zeros(&[2], DType::F16);
        assert!(t.to_vec::<f32>().is_err());
        assert_eq!(t.to_f64_vec().unwrap(), vec![0.0, 0.0]);
    }
}
