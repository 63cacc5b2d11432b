//! Memory arrangements understood by the engine.
//!
//! A tensor is either `Plain` (ordinary strided memory that generic kernels
//! can address directly) or `Opaque`, the accelerator-native arrangement that
//! only makes sense together with its format metadata. The opaque format used
//! here blocks the channel dimension (dim 1, or dim 0 for vectors) into
//! fixed-size inner blocks, zero padded up to a multiple of the block.

pub mod oracle;
pub mod reorder;

use serde::{Deserialize, Serialize};

use crate::core::tensor::Tensor;
use crate::core::types::DType;
use crate::error::{Error, Result};

/// Format metadata of an opaque tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueFormat {
    block: usize,
}

impl OpaqueFormat {
    pub fn blocked(block: usize) -> Result<Self> {
        if block == 0 {
            return Err(Error::precondition("opaque_format", "block size must be positive"));
        }
        Ok(Self { block })
    }

    pub fn block(&self) -> usize {
        self.block
    }

    /// (outer, channels, inner) extents around the blocked dimension.
    fn split(dims: &[usize]) -> (usize, usize, usize) {
        match dims.len() {
            0 => (1, 1, 1),
            1 => (1, dims[0], 1),
            _ => (dims[0], dims[1], dims[2..].iter().product()),
        }
    }

    fn channel_blocks(&self, channels: usize) -> usize {
        channels.div_ceil(self.block)
    }

    /// Number of physical elements including block padding.
    pub fn physical_len(&self, dims: &[usize]) -> usize {
        if dims.iter().any(|&d| d == 0) {
            return 0;
        }
        let (outer, channels, inner) = Self::split(dims);
        outer * self.channel_blocks(channels) * inner * self.block
    }

    /// Physical position of the element at row-major logical index `linear`.
    #[inline]
    pub fn physical_offset(&self, dims: &[usize], linear: usize) -> usize {
        let (_, channels, inner) = Self::split(dims);
        let o = linear / (channels * inner);
        let c = (linear / inner) % channels;
        let i = linear % inner;
        ((o * self.channel_blocks(channels) + c / self.block) * inner + i) * self.block
            + c % self.block
    }

    /// Human readable tag, e.g. `nChw16c` for a 4-d tensor.
    pub fn tag(&self, rank: usize) -> String {
        match rank {
            0 | 1 => format!("{}c", self.block),
            2 => format!("nC{}c", self.block),
            r => {
                let spatial: String = "dhw".chars().skip(3usize.saturating_sub(r - 2)).collect();
                format!("nC{spatial}{}c", self.block)
            }
        }
    }
}

/// Layout tag of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Plain,
    Opaque(OpaqueFormat),
}

impl Layout {
    pub fn is_plain(&self) -> bool {
        matches!(self, Layout::Plain)
    }

    pub fn opaque_format(&self) -> Option<OpaqueFormat> {
        match self {
            Layout::Plain => None,
            Layout::Opaque(fmt) => Some(*fmt),
        }
    }
}

/// How the elements of a memory descriptor are arranged.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryFormat {
    Strided { strides: Vec<usize>, offset: usize },
    Blocked(OpaqueFormat),
}

/// Layout-aware description of a tensor's memory, the currency of the fused
/// primitive backend and of reorders.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDesc {
    dims: Vec<usize>,
    dtype: DType,
    format: MemoryFormat,
}

impl MemoryDesc {
    pub fn of(tensor: &Tensor) -> Self {
        let format = match tensor.layout() {
            Layout::Plain => MemoryFormat::Strided {
                strides: tensor.strides().to_vec(),
                offset: tensor.offset(),
            },
            Layout::Opaque(fmt) => MemoryFormat::Blocked(fmt),
        };
        Self {
            dims: tensor.shape().to_vec(),
            dtype: tensor.dtype(),
            format,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn format(&self) -> &MemoryFormat {
        &self.format
    }

    pub fn elem_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.format, MemoryFormat::Blocked(_))
    }

    /// Physical element offset of the row-major logical index `linear`.
    #[inline]
    pub fn physical_offset(&self, linear: usize) -> usize {
        match &self.format {
            MemoryFormat::Strided { strides, offset } => {
                strided_offset(&self.dims, strides, *offset, linear)
            }
            MemoryFormat::Blocked(fmt) => fmt.physical_offset(&self.dims, linear),
        }
    }
}

#[inline]
pub(crate) fn strided_offset(dims: &[usize], strides: &[usize], base: usize, linear: usize) -> usize {
    let mut rem = linear;
    let mut off = base;
    for d in (0..dims.len()).rev() {
        let size = dims[d];
        off += (rem % size) * strides[d];
        rem /= size;
    }
    off
}

/// Read-only classification of a tensor used purely for dispatch decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutDescriptor {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub opaque: bool,
    /// Opaque tensors are dense by construction and count as contiguous.
    pub contiguous: bool,
    pub channels_last: bool,
    pub is_view: bool,
}

impl LayoutDescriptor {
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            opaque: !tensor.layout().is_plain(),
            contiguous: tensor.is_contiguous(),
            channels_last: tensor.is_channels_last(),
            is_view: tensor.is_view(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}
