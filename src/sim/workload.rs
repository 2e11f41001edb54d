use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::pipeline::types::{Command, OpKind};
use crate::sim::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPattern {
    Sequential,
    Random,
}

/// Synthetic command stream used when no trace is given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub count: usize,
    /// Fraction of reads, 0.0..=1.0.
    pub read_ratio: f64,
    pub transfer_length: u32,
    /// Addresses fall in `0..address_span`, aligned to `transfer_length`.
    pub address_span: u64,
    pub pattern: AddressPattern,
    pub seed: u64,
}

impl Config for WorkloadConfig {}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            count: 1000,
            read_ratio: 0.7,
            transfer_length: 4096,
            address_span: 1 << 30,
            pattern: AddressPattern::Random,
            seed: 0,
        }
    }
}

impl WorkloadConfig {
    /// Must pass before `generate` is called.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.read_ratio) {
            return Err(ConfigError::BadReadRatio(self.read_ratio.to_string()));
        }
        Ok(())
    }

    pub fn generate(&self) -> Vec<Command> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let length = self.transfer_length.max(1);
        let slots = (self.address_span / length as u64).max(1);

        (0..self.count)
            .map(|i| {
                let slot = match self.pattern {
                    AddressPattern::Sequential => i as u64 % slots,
                    AddressPattern::Random => rng.gen_range(0..slots),
                };
                let address = slot * length as u64;
                if rng.gen_bool(self.read_ratio) {
                    Command::new(OpKind::Read, address, length, 0)
                } else {
                    Command::new(OpKind::Write, address, length, rng.gen())
                }
            })
            .collect()
    }
}
