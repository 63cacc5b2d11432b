use std::sync::atomic::{AtomicU64, Ordering};

use log::{info, trace, warn};
use rayon::prelude::*;

use super::{DeviceId, DeviceInfo, Queue, WorkGroup};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kernels::launch::LaunchPlan;

/// In-order queue backed by a dedicated rayon pool.
///
/// `submit` returns once every work group has run, which is one valid
/// schedule of an in-order queue; `barrier` therefore has nothing to wait on.
pub struct HostQueue {
    id: DeviceId,
    info: DeviceInfo,
    pool: rayon::ThreadPool,
    submitted: AtomicU64,
}

impl HostQueue {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut info = DeviceInfo::detect();
        if let Some(width) = config.max_work_group_size {
            if width == 0 {
                return Err(Error::Device("max_work_group_size must be positive".to_string()));
            }
            warn!(
                "overriding device work group size {} with configured {}",
                info.max_work_group_size, width
            );
            info.max_work_group_size = width;
        }

        let threads = config.num_threads.unwrap_or(info.compute_units).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("eltwise-worker-{i}"))
            .build()
            .map_err(|e| Error::Device(format!("failed to build worker pool: {e}")))?;

        let id = DeviceId::new(config.device_ordinal);
        info!("host queue on device {} ready ({threads} workers): {}", id.ordinal(), info.describe());

        Ok(Self {
            id,
            info,
            pool,
            submitted: AtomicU64::new(0),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Number of kernels submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Queue for HostQueue {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn max_work_group_size(&self) -> usize {
        self.info.max_work_group_size
    }

    fn submit(&self, name: &str, plan: &LaunchPlan, kernel: &(dyn Fn(WorkGroup) + Sync)) -> Result<()> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if plan.group_count() == 0 {
            return Ok(());
        }
        trace!(
            "submit {name}: {} groups x {} lanes (unroll {})",
            plan.group_count(),
            plan.group_size(),
            plan.unroll()
        );
        let (size, count) = (plan.group_size(), plan.group_count());
        self.pool.install(|| {
            (0..count)
                .into_par_iter()
                .for_each(|id| kernel(WorkGroup::new(id, size, count)));
        });
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        trace!("barrier on device {}", self.id.ordinal());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_every_lane_runs_once() {
        let config = EngineConfig {
            max_work_group_size: Some(8),
            num_threads: Some(2),
            ..EngineConfig::default()
        };
        let queue = HostQueue::new(&config).unwrap();
        let plan = LaunchPlan::for_elements(50, queue.max_work_group_size());
        let hits: Vec<AtomicUsize> = (0..plan.total_lanes()).map(|_| AtomicUsize::new(0)).collect();
        queue
            .submit("count", &plan, &|group: WorkGroup| {
                for item in group.items() {
                    hits[item.global_id()].fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert_eq!(queue.submitted(), 1);
    }

    #[test]
    fn test_zero_width_is_rejected() {
        let config = EngineConfig {
            max_work_group_size: Some(0),
            ..EngineConfig::default()
        };
        assert!(HostQueue::new(&config).is_err());
    }
}
