use std::path::PathBuf;

use log::info;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::error::ConfigError;

pub trait Config: DeserializeOwned + Default {
    /// Deserialize one TOML section; a missing section falls back to the defaults.
    fn from_section(section: Option<&Value>) -> Result<Self, ConfigError> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|err: de::Error| ConfigError::Malformed(err.to_string())),
            None => {
                info!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    /// Hard stop, in cycles.
    pub timeout: u64,
    pub trace: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    pub perf_log: bool,
    /// Cycles between periodic stats records when `perf_log` is on.
    pub stats_interval: u64,
    /// Model clock, used only to convert cycle counts to wall time.
    pub clock_mhz: f64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 10_000_000,
            trace: None,
            summary_json: None,
            perf_log: false,
            stats_interval: 10_000,
            clock_mhz: 100.0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.clock_mhz.is_finite() && self.clock_mhz > 0.0) {
            return Err(ConfigError::BadClock(self.clock_mhz.to_string()));
        }
        Ok(())
    }

    pub fn cycles_per_us(&self) -> f64 {
        self.clock_mhz
    }
}

/// Shape of the pipeline.  Fixed at construction.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub num_queues: usize,
    pub queue_depth: usize,
    /// Depth of every inter-stage FIFO.
    pub fifo_depth: usize,
    /// Depth of the device completion FIFO feeding the completion matcher.
    pub completion_fifo_depth: usize,
    pub sector_size: u32,
    /// Request packets that may be live at once.
    pub max_inflight: usize,
    pub request_id_bits: u32,
    pub op_id_bits: u32,
    pub latency_history: usize,
    /// Completions between percentile recomputes.
    pub percentile_interval: usize,
    pub completions_per_cycle: usize,
    /// Carried on every submission record; never enforced.
    pub timeout_cycles: u32,
    pub namespace_id: u32,
    /// Base of the modeled DMA window that request buffers are carved from.
    pub buffer_base: u64,
}

impl Config for PipelineConfig {}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_queues: 4,
            queue_depth: 16,
            fifo_depth: 4,
            completion_fifo_depth: 8,
            sector_size: 512,
            max_inflight: 64,
            request_id_bits: 16,
            op_id_bits: 16,
            latency_history: 4096,
            percentile_interval: 64,
            completions_per_cycle: 1,
            timeout_cycles: 30_000,
            namespace_id: 1,
            buffer_base: 0x1_0000_0000,
        }
    }
}

pub const MAX_REQUEST_ID_BITS: u32 = 20;
pub const MAX_OP_ID_BITS: u32 = 16;

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_queues == 0 {
            return Err(ConfigError::NoQueues);
        }
        let depths = [
            ("queue_depth", self.queue_depth),
            ("fifo_depth", self.fifo_depth),
            ("completion_fifo_depth", self.completion_fifo_depth),
            ("max_inflight", self.max_inflight),
            ("latency_history", self.latency_history),
            ("percentile_interval", self.percentile_interval),
            ("completions_per_cycle", self.completions_per_cycle),
        ];
        if let Some((name, _)) = depths.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroDepth(*name));
        }
        if !self.sector_size.is_power_of_two() {
            return Err(ConfigError::BadSectorSize(self.sector_size));
        }
        if !(1..=MAX_REQUEST_ID_BITS).contains(&self.request_id_bits) {
            return Err(ConfigError::IdWidth {
                name: "request_id_bits",
                bits: self.request_id_bits,
                min: 1,
                max: MAX_REQUEST_ID_BITS,
            });
        }
        if !(1..=MAX_OP_ID_BITS).contains(&self.op_id_bits) {
            return Err(ConfigError::IdWidth {
                name: "op_id_bits",
                bits: self.op_id_bits,
                min: 1,
                max: MAX_OP_ID_BITS,
            });
        }
        let request_ids = 1usize << self.request_id_bits;
        if self.max_inflight > request_ids {
            return Err(ConfigError::InflightExceedsIdSpace {
                max_inflight: self.max_inflight,
                id_space: request_ids,
            });
        }
        let op_ids = 1usize << self.op_id_bits;
        let slots = self.num_queues.saturating_mul(self.queue_depth);
        if slots > op_ids {
            return Err(ConfigError::SlotsExceedOpIdSpace {
                slots,
                id_space: op_ids,
            });
        }
        Ok(())
    }

    pub fn total_slots(&self) -> usize {
        self.num_queues * self.queue_depth
    }
}
