use std::collections::VecDeque;

use log::{debug, error};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::base::port::ChannelRef;
use crate::error::ConfigError;
use crate::pipeline::types::*;
use crate::sim::config::{Config, PipelineConfig};
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// When off, issued commands are left for the harness and completions are injected by hand.
    pub enabled: bool,
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    /// Upper bound of the uniform extra latency added per command.
    pub jitter: Cycle,
    pub seed: u64,
    /// Fail every k-th serviced command; 0 never fails.
    pub error_every: u64,
    #[serde(flatten)]
    pub server: ServerConfig,
}

impl Config for DeviceConfig {}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_latency: 400,
            write_latency: 280,
            jitter: 0,
            seed: 0,
            error_every: 0,
            server: ServerConfig {
                base_latency: 15,
                bytes_per_cycle: 64,
                queue_capacity: 1,
            },
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bytes_per_cycle == 0 {
            return Err(ConfigError::ZeroBandwidth);
        }
        Ok(())
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Command held by a timed server.  An entry that failed to decode still takes its turn so the
/// queue keeps completing in order.
#[derive(Debug, Clone, Copy)]
struct InService {
    op_id: OpId,
    decoded: bool,
}

/// Decoded entry waiting for its queue's server.
#[derive(Debug, Clone, Copy)]
struct Pending {
    op: InService,
    kind: Option<OpKind>,
    bytes: u32,
}

/// Behavioral device: decodes each submission entry, services each device queue in FIFO order
/// through its own timed server and reports completions on the device completion FIFO.
pub struct DeviceModel {
    config: DeviceConfig,
    sector_size: u32,
    servers: Vec<TimedServer<InService>>,
    /// Commands received but not yet admitted to their queue's server.
    pending: Vec<VecDeque<Pending>>,
    /// Serviced commands waiting for room on the completion FIFO.
    ready: VecDeque<DeviceCompletion>,
    rng: StdRng,
    serviced: u64,
    failed: u64,
    malformed: u64,
    pulses: PulseBuffer,
}

impl DeviceModel {
    pub fn new(config: DeviceConfig, pipeline: &PipelineConfig) -> Self {
        let server = ServerConfig {
            queue_capacity: pipeline.queue_depth,
            ..config.server
        };
        Self {
            config,
            sector_size: pipeline.sector_size,
            servers: (0..pipeline.num_queues)
                .map(|_| TimedServer::new(server))
                .collect(),
            pending: (0..pipeline.num_queues).map(|_| VecDeque::new()).collect(),
            ready: VecDeque::new(),
            rng: StdRng::seed_from_u64(config.seed),
            serviced: 0,
            failed: 0,
            malformed: 0,
            pulses: PulseBuffer::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn serviced(&self) -> u64 {
        self.serviced
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Submission entries that did not decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
            && self.pending.iter().all(VecDeque::is_empty)
            && self.servers.iter().all(TimedServer::is_idle)
    }

    /// Take an issued command off the device link and decode its submission entry.
    pub fn accept(&mut self, issued: IssuedCommand) {
        let entry = issued.entry;
        let pending = match entry.command() {
            Ok(command) => {
                if command.op_id != entry.op_id {
                    error!(
                        "device: entry for op {} carries op id {}",
                        entry.op_id, command.op_id
                    );
                    self.violation("submission entry op id disagrees with its slot");
                }
                Pending {
                    op: InService {
                        op_id: entry.op_id,
                        decoded: true,
                    },
                    kind: Some(command.kind),
                    bytes: command
                        .transfer_bytes(self.sector_size)
                        .min(u32::MAX as u64) as u32,
                }
            }
            Err(err) => {
                error!(
                    "device: op {} on queue {}: bad submission entry: {}",
                    entry.op_id, issued.queue, err
                );
                self.malformed += 1;
                self.violation("undecodable submission entry");
                Pending {
                    op: InService {
                        op_id: entry.op_id,
                        decoded: false,
                    },
                    kind: None,
                    bytes: 0,
                }
            }
        };
        self.pending[issued.queue].push_back(pending);
    }

    fn violation(&mut self, what: &'static str) {
        self.pulses.push(Pulse::InvariantViolation {
            stage: StageId::Device,
            what,
        });
    }

    fn media_latency(&mut self, kind: OpKind) -> Cycle {
        let base = match kind {
            OpKind::Read => self.config.read_latency,
            OpKind::Write => self.config.write_latency,
        };
        let jitter = if self.config.jitter > 0 {
            self.rng.gen_range(0..=self.config.jitter)
        } else {
            0
        };
        base + jitter
    }

    fn status_for_next(&mut self) -> u16 {
        self.serviced += 1;
        let every = self.config.error_every;
        if every > 0 && self.serviced % every == 0 {
            self.failed += 1;
            DEVICE_STATUS_MEDIA_ERROR
        } else {
            DEVICE_STATUS_SUCCESS
        }
    }

    /// Advance the device to `now`, pushing finished commands onto `completions`.
    pub fn tick(&mut self, now: Cycle, completions: &ChannelRef<DeviceCompletion>) {
        for queue in 0..self.servers.len() {
            while let Some(next) = self.pending[queue].front().copied() {
                let latency = next.kind.map_or(0, |kind| self.media_latency(kind));
                let request = ServiceRequest::with_latency(next.op, next.bytes, latency);
                if self.servers[queue].try_enqueue(now, request).is_err() {
                    break;
                }
                self.pending[queue].pop_front();
            }

            let mut done = Vec::new();
            self.servers[queue].service_ready(now, |result| done.push(result.payload));
            for op in done {
                let status = if op.decoded {
                    self.status_for_next()
                } else {
                    self.failed += 1;
                    DEVICE_STATUS_INVALID_FIELD
                };
                debug!("device: op {} done on queue {} status {:#x}", op.op_id, queue, status);
                self.ready.push_back(DeviceCompletion {
                    op_id: op.op_id,
                    status,
                });
            }
        }

        while let Some(completion) = self.ready.front().copied() {
            if !completions.put_owned(completion) {
                break;
            }
            self.ready.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.servers.iter_mut().for_each(TimedServer::clear);
        self.pending.iter_mut().for_each(VecDeque::clear);
        self.ready.clear();
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.serviced = 0;
        self.failed = 0;
        self.malformed = 0;
        self.pulses.clear();
    }
}

impl PulseSource for DeviceModel {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
