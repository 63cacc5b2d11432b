//! Device capability detection for the host execution queue
//! Queries the parallel width the launcher partitions work against
//!
//! The host queue models an accelerator on the CPU: every hardware thread
//! is a compute unit and a work group is a batch of lanes executed by one
//! worker. Vector extensions are reported for diagnostics only.

use serde::Serialize;

#[cfg(target_arch = "x86_64")]
use std::arch::is_x86_feature_detected;

#[cfg(target_arch = "aarch64")]
use std::arch::is_aarch64_feature_detected;

/// Default upper bound on lanes per work group
pub const DEFAULT_MAX_WORK_GROUP_SIZE: usize = 256;

/// Detected capabilities of the execution device
/// Populated once when a queue is created and used for launch planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Display name
    pub name: String,

    /// Number of workers that execute work groups concurrently
    pub compute_units: usize,

    /// Maximum lanes per work group (the device-reported parallel width)
    pub max_work_group_size: usize,

    /// Double precision kernels are available
    pub supports_fp64: bool,

    /// Vector extensions present on the host
    pub vector_extensions: Vec<&'static str>,
}

impl DeviceInfo {
    /// Detect the host device
    /// This is safe to call repeatedly, it only queries capabilities
    pub fn detect() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            name: "host".to_string(),
            compute_units,
            max_work_group_size: DEFAULT_MAX_WORK_GROUP_SIZE,
            supports_fp64: true,
            vector_extensions: detect_vector_extensions(),
        }
    }

    /// Get a human-readable description of the device
    pub fn describe(&self) -> String {
        let extensions = if self.vector_extensions.is_empty() {
            "none".to_string()
        } else {
            self.vector_extensions.join(", ")
        };
        format!(
            "{}: {} compute units, max work group size {}, fp64 {}, vector extensions: {}",
            self.name,
            self.compute_units,
            self.max_work_group_size,
            if self.supports_fp64 { "yes" } else { "no" },
            extensions
        )
    }
}

fn detect_vector_extensions() -> Vec<&'static str> {
    #[allow(unused_mut)]
    let mut found = Vec::new();

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            found.push("AVX2");
        }
        if is_x86_feature_detected!("avx512f") {
            found.push("AVX512F");
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if is_aarch64_feature_detected!("neon") {
            found.push("NEON");
        }
        if is_aarch64_feature_detected!("dotprod") {
            found.push("DOTPROD");
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_detection() {
        let info = DeviceInfo::detect();
        assert!(info.compute_units >= 1);
        assert_eq!(info.max_work_group_size, DEFAULT_MAX_WORK_GROUP_SIZE);
        let _ = info.describe();
    }

    #[test]
    fn test_device_describe() {
        let info = DeviceInfo {
            name: "host".to_string(),
            compute_units: 4,
            max_work_group_size: 64,
            supports_fp64: false,
            vector_extensions: vec![],
        };
        let desc = info.describe();
        assert!(desc.contains("4 compute units"));
        assert!(desc.contains("max work group size 64"));
        assert!(desc.contains("vector extensions: none"));
    }
}
