//! Local-attention mixer configuration
//!
//! One mixer routes half of its `dim` channels through a horizontal then a
//! vertical local-attention pass, splitting them into `num_heads` groups.
//! Loaded from JSON; every field is optional.
//!
//! ```json
//! {"dim": 64, "kernel_size": 13, "kernel_loc": [4, 6, 7], "kernel_stride": [1, 2, 4], "num_heads": 4}
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::KernelMapCache;
use crate::error::{FsaError, Result};
use crate::fsa::{Direction, LocalAttention};
use crate::kernel_map::{KernelMap, StrideSchedule};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MixerConfig {
    /// Channel dimension of the mixer block.
    pub dim: usize,
    pub kernel_size: usize,
    /// Stride-change locations for one side of the kernel.
    pub kernel_loc: Vec<usize>,
    /// Stride of each segment.
    pub kernel_stride: Vec<usize>,
    pub num_heads: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            kernel_size: 13,
            kernel_loc: vec![4, 6, 7],
            kernel_stride: vec![1, 2, 4],
            num_heads: 4,
        }
    }
}

/// Horizontal + vertical operators sharing one kernel map.
#[derive(Clone, Debug)]
pub struct MixerOperators {
    pub horizontal: LocalAttention,
    pub vertical: LocalAttention,
    pub patch_size: usize,
}

impl MixerOperators {
    pub fn kernel_map(&self) -> &Arc<KernelMap> {
        self.horizontal.kernel_map()
    }

    pub fn get(&self, direction: Direction) -> &LocalAttention {
        match direction {
            Direction::Horizontal => &self.horizontal,
            Direction::Vertical => &self.vertical,
        }
    }
}

impl MixerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MixerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading mixer config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the channel split. The schedule itself is checked when the
    /// kernel map is generated.
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 {
            return Err(FsaError::InvalidMixer("num_heads must be >= 1".to_string()));
        }
        if self.dim == 0 || self.dim % (2 * self.num_heads) != 0 {
            return Err(FsaError::InvalidMixer(format!(
                "dim ({}) must be a positive multiple of 2 * num_heads ({})",
                self.dim,
                2 * self.num_heads
            )));
        }
        Ok(())
    }

    /// Channel groups sharing one set of tap weights.
    pub fn groups(&self) -> usize {
        self.num_heads
    }

    /// Channels per group; the attention path sees `dim / 2` channels.
    pub fn group_channels(&self) -> usize {
        self.dim / self.num_heads / 2
    }

    pub fn schedule(&self) -> Result<StrideSchedule> {
        StrideSchedule::new(self.kernel_loc.clone(), self.kernel_stride.clone())
    }

    /// Build both directional operators, sharing the map through `cache`.
    pub fn build(&self, cache: &mut KernelMapCache) -> Result<MixerOperators> {
        self.validate()?;
        let kernel_map = cache.get_or_generate(self.kernel_size, &self.schedule()?)?;
        let patch_size = kernel_map.patch_size();

        let make = |direction| {
            LocalAttention::new(
                direction,
                self.kernel_size,
                Arc::clone(&kernel_map),
                self.groups(),
                self.group_channels(),
            )
        };

        Ok(MixerOperators {
            horizontal: make(Direction::Horizontal)?,
            vertical: make(Direction::Vertical)?,
            patch_size,
        })
    }
}
