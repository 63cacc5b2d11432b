//! Device / queue provider.
//!
//! The engine only needs three things from a device: an identifier, the
//! maximum number of lanes per work group, and an in-order queue that runs a
//! kernel over a grid of work groups. `HostQueue` provides them on a rayon
//! pool.

pub mod host;
pub mod info;

pub use host::HostQueue;
pub use info::DeviceInfo;

use crate::core::storage::Storage;
use crate::core::tensor::Tensor;
use crate::core::types::Element;
use crate::error::{Error, Result};
use crate::kernels::launch::LaunchPlan;

/// Identifier of the device a tensor lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

impl DeviceId {
    pub fn new(ordinal: usize) -> Self {
        Self(ordinal)
    }

    pub fn ordinal(&self) -> usize {
        self.0
    }
}

/// In-order compute queue.
///
/// Submissions on one queue execute in submission order. Results are only
/// guaranteed visible to the host after `barrier` returns.
pub trait Queue: Send + Sync {
    fn device_id(&self) -> DeviceId;

    /// Device-reported maximum lanes per work group.
    fn max_work_group_size(&self) -> usize;

    /// Runs `kernel` once per work group of `plan`. Kernels must not block,
    /// allocate or take locks.
    fn submit(&self, name: &str, plan: &LaunchPlan, kernel: &(dyn Fn(WorkGroup) + Sync)) -> Result<()>;

    /// Lightweight barrier between producer and consumer kernels.
    fn barrier(&self) -> Result<()>;
}

/// One work group of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroup {
    id: usize,
    size: usize,
    count: usize,
}

impl WorkGroup {
    pub fn new(id: usize, size: usize, count: usize) -> Self {
        Self { id, size, count }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn items(self) -> impl Iterator<Item = WorkItem> {
        (0..self.size).map(move |local| WorkItem {
            group: self.id,
            local,
            group_size: self.size,
            group_count: self.count,
        })
    }
}

/// One lane, identified by its position in the launch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    group: usize,
    local: usize,
    group_size: usize,
    group_count: usize,
}

impl WorkItem {
    #[inline]
    pub fn global_id(&self) -> usize {
        self.group * self.group_size + self.local
    }

    pub fn local_id(&self) -> usize {
        self.local
    }

    pub fn group_id(&self) -> usize {
        self.group
    }

    pub fn local_range(&self) -> usize {
        self.group_size
    }

    pub fn group_range(&self) -> usize {
        self.group_count
    }

    #[inline]
    pub fn global_range(&self) -> usize {
        self.group_size * self.group_count
    }
}

/// Raw element pointer handed to lanes.
#[derive(Debug)]
pub(crate) struct DevicePtr<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePtr<T> {}

unsafe impl<T: Send> Send for DevicePtr<T> {}
unsafe impl<T: Send> Sync for DevicePtr<T> {}

impl<T: Element> DevicePtr<T> {
    /// Base pointer of the storage behind `tensor`; physical offsets are
    /// applied by the caller.
    pub(crate) fn of(tensor: &Tensor, op: &str) -> Result<Self> {
        Self::in_storage(tensor.storage(), op)
    }

    pub(crate) fn in_storage(storage: &Storage, op: &str) -> Result<Self> {
        let mem = T::memory(storage).ok_or_else(|| {
            Error::precondition(op, format!("expected {} storage, found {}", T::DTYPE, storage.dtype()))
        })?;
        Ok(Self {
            ptr: mem.as_ptr(),
            len: mem.len(),
        })
    }

    /// # Safety
    /// `index` must be in bounds and not concurrently written by another lane.
    #[inline]
    pub(crate) unsafe fn load(self, index: usize) -> T {
        debug_assert!(index < self.len);
        unsafe { self.ptr.add(index).read() }
    }

    /// # Safety
    /// `index` must be in bounds and owned by the calling lane.
    #[inline]
    pub(crate) unsafe fn store(self, index: usize, value: T) {
        debug_assert!(index < self.len);
        unsafe { self.ptr.add(index).write(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_ids() {
        let group = WorkGroup::new(2, 4, 3);
        let ids: Vec<usize> = group.items().map(|item| item.global_id()).collect();
        assert_eq!(ids, vec![8, 9, 10, 11]);
        let last = group.items().last().unwrap();
        assert_eq!(last.local_id(), 3);
        assert_eq!(last.global_range(), 12);
        assert_eq!(last.group_range(), 3);
    }
}
