//! Work partitioning for generic kernels.

use serde::Serialize;

use crate::device::{Queue, WorkGroup, WorkItem};
use crate::error::Result;

/// Number of 32-bit counter words one Philox block yields.
pub const PHILOX_BLOCK: u64 = 4;

/// Grid of a generic kernel launch.
///
/// `group_size = min(W, N)` lanes per group and enough groups to cover `N`
/// (or `N / unroll` for kernels where every lane handles `unroll` elements
/// per pass). An empty launch has zero groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    group_count: usize,
    group_size: usize,
    unroll: usize,
}

impl LaunchPlan {
    pub fn for_elements(numel: usize, max_width: usize) -> Self {
        Self::for_unrolled(numel, max_width, 1)
    }

    /// Grid for kernels where each lane handles `unroll` elements per pass.
    pub fn for_unrolled(numel: usize, max_width: usize, unroll: usize) -> Self {
        let unroll = unroll.max(1);
        let group_size = max_width.min(numel).max(1);
        let group_count = numel.div_ceil(group_size * unroll);
        Self {
            group_count,
            group_size,
            unroll,
        }
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn unroll(&self) -> usize {
        self.unroll
    }

    pub fn is_empty(&self) -> bool {
        self.group_count == 0
    }

    pub fn total_lanes(&self) -> usize {
        self.group_count * self.group_size
    }

    /// Distance between consecutive passes of one lane.
    pub fn stride(&self) -> usize {
        self.total_lanes() * self.unroll
    }

    /// `numel` rounded up to a whole number of passes.
    pub fn rounded_size(&self, numel: usize) -> usize {
        self.passes(numel) * self.stride()
    }

    /// Counter words a random kernel over `numel` elements may consume per
    /// lane: one Philox block per pass.
    pub fn counter_offset(&self, numel: usize) -> u64 {
        self.passes(numel) as u64 * PHILOX_BLOCK
    }

    fn passes(&self, numel: usize) -> usize {
        if numel == 0 || self.stride() == 0 {
            return 0;
        }
        (numel - 1) / self.stride() + 1
    }
}

/// Runs `lane` once for every lane of `plan`. Lanes past the element count
/// are not filtered here; the body bounds-checks its own indices.
pub(crate) fn launch<F>(queue: &dyn Queue, name: &str, plan: &LaunchPlan, lane: F) -> Result<()>
where
    F: Fn(WorkItem) + Sync,
{
    queue.submit(name, plan, &|group: WorkGroup| {
        for item in group.items() {
            lane(item);
        }
    })
}

/// One lane per element; lanes beyond `numel` return immediately.
pub(crate) fn launch_elements<F>(queue: &dyn Queue, name: &str, numel: usize, body: F) -> Result<()>
where
    F: Fn(usize) + Sync,
{
    let plan = LaunchPlan::for_elements(numel, queue.max_work_group_size());
    launch(queue, name, &plan, |item| {
        let i = item.global_id();
        if i < numel {
            body(i);
        }
    })
}
