use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::Result;
use crate::layout::OpaqueFormat;

/// Engine settings. Every field has a default, so a config file only needs
/// the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overrides the device-reported maximum work group size.
    pub max_work_group_size: Option<usize>,

    /// Worker threads of the host queue; defaults to the detected compute
    /// units.
    pub num_threads: Option<usize>,

    pub device_ordinal: usize,

    /// Send eligible plain operands to the fused primitives too. When false
    /// the fused path is only taken if some operand is opaque.
    pub prefer_fused_for_plain: bool,

    /// Seed for generators handed out by the engine; entropy when unset.
    pub seed: Option<u64>,

    /// Channel block of the opaque format produced by `Engine::to_opaque`.
    pub opaque_block: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_work_group_size: None,
            num_threads: None,
            device_ordinal: 0,
            prefer_fused_for_plain: false,
            seed: None,
            opaque_block: 16,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!("loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_work_group_size == Some(0) {
            bail!("max_work_group_size must be positive");
        }
        if self.num_threads == Some(0) {
            bail!("num_threads must be positive");
        }
        self.opaque_format().map(|_| ())
    }

    pub fn opaque_format(&self) -> Result<OpaqueFormat> {
        OpaqueFormat::blocked(self.opaque_block)
    }
}
