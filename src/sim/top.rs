use std::collections::VecDeque;
use std::sync::Arc;

use log::{info, warn};

use crate::base::behavior::*;
use crate::base::port::{link, tie_off, tie_off_input, ChannelRef};
use crate::error::{CommandError, ConfigError, SimError};
use crate::pipeline::*;
use crate::sim::config::{PipelineConfig, SimConfig};
use crate::sim::perf_log::{stats_logger, RunSummary, StatsLog, StatsRecord};
use crate::timeq::Cycle;

/// The whole submission pipeline plus the clock that drives it.
///
/// Channels run ingress → packet manager → translation → submission → device, with completions
/// coming back through the matcher to the packet manager and retire credits to ingress.
pub struct PipelineTop {
    config: Arc<PipelineConfig>,
    pub ingress: CommandIngress,
    pub packets: RequestPacketManager,
    pub translate: BlockTranslation,
    pub submit: DeviceSubmission,
    pub matcher: CompletionMatcher,
    pool: SharedPool,
    device: DeviceModel,
    stats: StatsCollector,
    channels: Vec<Box<dyn Committable>>,
    device_link: ChannelRef<IssuedCommand>,
    completion_link: ChannelRef<DeviceCompletion>,
    /// Device commands left for the harness when the device model is off.
    outbox: VecDeque<IssuedCommand>,
    pulses: Vec<Pulse>,
    fed: usize,
    now: Cycle,
}

impl PipelineTop {
    pub fn new(config: Arc<PipelineConfig>, device: DeviceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        device.validate()?;
        let pool = DeviceQueuePool::shared(config.num_queues, config.queue_depth, config.op_id_bits);

        let mut ingress = CommandIngress::new(Arc::clone(&config));
        let mut packets = RequestPacketManager::new(Arc::clone(&config));
        let mut translate = BlockTranslation::new(Arc::clone(&config));
        let mut submit = DeviceSubmission::new(Arc::clone(&config), Arc::clone(&pool));
        let mut matcher = CompletionMatcher::new(Arc::clone(&config), Arc::clone(&pool));

        let fifo = config.fifo_depth;
        let accepted = link(&mut packets.cmd_in, &mut ingress.cmd_out, fifo);
        let requests = link(&mut translate.packet_in, &mut packets.packet_out, fifo);
        let records = link(&mut submit.record_in, &mut translate.record_out, fifo);
        let matches = link(&mut packets.match_in, &mut matcher.match_out, fifo);
        // one credit per live packet, so retirement never waits on ingress
        let credits = link(&mut ingress.retire_in, &mut packets.retire_out, config.max_inflight);
        let device_link = tie_off(&mut submit.device_out, config.total_slots());
        let completion_link =
            tie_off_input(&mut matcher.completion_in, config.completion_fifo_depth);

        let channels: Vec<Box<dyn Committable>> = vec![
            Box::new(accepted),
            Box::new(requests),
            Box::new(records),
            Box::new(matches),
            Box::new(credits),
            Box::new(device_link.clone()),
            Box::new(completion_link.clone()),
        ];

        Ok(Self {
            device: DeviceModel::new(device, &config),
            stats: StatsCollector::new(&config),
            config,
            ingress,
            packets,
            translate,
            submit,
            matcher,
            pool,
            channels,
            device_link,
            completion_link,
            outbox: VecDeque::new(),
            pulses: Vec::new(),
            fed: 0,
            now: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Swap in a collector, e.g. one whose stamp counter starts near the wrap point.
    pub fn replace_stats(&mut self, stats: StatsCollector) {
        self.stats = stats;
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn device(&self) -> &DeviceModel {
        &self.device
    }

    /// Validate a batch of commands and append it to the command source.  Nothing is queued if
    /// any record is rejected.
    pub fn feed(&mut self, commands: Vec<Command>) -> Result<(), CommandError> {
        for (i, command) in commands.iter().enumerate() {
            command.validate(self.fed + i)?;
        }
        self.fed += commands.len();
        self.ingress.feed(commands);
        Ok(())
    }

    /// Hand a device completion to the matcher; it becomes visible on the cycle after the next.
    /// Returns false if the completion FIFO is full.
    pub fn inject_completion(&mut self, completion: DeviceCompletion) -> bool {
        self.completion_link.put_owned(completion)
    }

    /// Device commands issued so far and not yet taken, oldest first.
    pub fn drain_device_commands(&mut self) -> Vec<IssuedCommand> {
        self.outbox.drain(..).collect()
    }

    pub fn inflight(&self) -> usize {
        self.pool.read().expect("rw lock poisoned").inflight()
    }

    /// Every fed command has been accepted, completed and retired.
    pub fn drained(&self) -> bool {
        self.ingress.pending() == 0
            && self.ingress.live_requests() == 0
            && self.packets.live_packets() == 0
            && self.inflight() == 0
    }

    /// One full cycle: every module computes its next state, then everything commits.
    pub fn tick(&mut self) {
        self.tick_one();
        self.commit();
    }

    /// Committed occupancy of each device queue.
    pub fn queue_occupancy(&self) -> Vec<usize> {
        let pool = self.pool.read().expect("rw lock poisoned");
        (0..pool.num_queues()).map(|q| pool.occupancy(q)).collect()
    }

    fn collect_pulses(&mut self) {
        self.ingress.drain_pulses(&mut self.pulses);
        self.packets.drain_pulses(&mut self.pulses);
        self.translate.drain_pulses(&mut self.pulses);
        self.submit.drain_pulses(&mut self.pulses);
        self.matcher.drain_pulses(&mut self.pulses);
        self.device.drain_pulses(&mut self.pulses);
    }

    pub fn report(&mut self) -> PipelineReport {
        self.stats.finalize();
        let pool = self.pool.read().expect("rw lock poisoned");
        PipelineReport {
            total_cycles: self.stats.total_cycles(),
            counters: *self.stats.counters(),
            latency: self.stats.latency(),
            stalls: *self.stats.stalls(),
            max_queue_depth: pool.max_depth_reached(),
            submitted_per_queue: pool.submitted_per_queue().to_vec(),
            out_of_order_completions: pool.out_of_order_completions(),
            live_requests: self.ingress.live_requests(),
        }
    }
}

impl ModuleBehaviors for PipelineTop {
    fn tick_one(&mut self) {
        while let Some(command) = self.device_link.get() {
            if self.device.enabled() {
                self.device.accept(command);
            } else {
                self.outbox.push_back(command);
            }
        }

        self.ingress.tick_one();
        self.packets.tick_one();
        self.translate.tick_one();
        self.submit.tick_one();
        self.matcher.tick_one();
        if self.device.enabled() {
            self.device.tick(self.now, &self.completion_link);
        }
    }

    fn commit(&mut self) {
        self.channels.iter().for_each(|c| c.commit());
        self.pool.write().expect("rw lock poisoned").commit();
        self.ingress.commit();
        self.packets.commit();
        self.translate.commit();
        self.submit.commit();
        self.matcher.commit();

        self.collect_pulses();
        self.stats.observe(&self.pulses);
        self.pulses.clear();
        self.stats.advance();
        self.now += 1;
    }

    fn reset(&mut self) {
        self.ingress.reset();
        self.packets.reset();
        self.translate.reset();
        self.submit.reset();
        self.matcher.reset();
        self.pool.write().expect("rw lock poisoned").reset();
        self.device.reset();
        self.stats.reset();
        self.channels.iter().for_each(|c| c.clear());
        self.outbox.clear();
        self.pulses.clear();
        self.fed = 0;
        self.now = 0;
    }
}

pub struct Sim {
    config: SimConfig,
    pub top: PipelineTop,
}

impl Sim {
    pub fn new(
        sim_config: SimConfig,
        pipeline_config: PipelineConfig,
        device_config: DeviceConfig,
    ) -> Result<Sim, SimError> {
        sim_config.validate()?;
        let top = PipelineTop::new(Arc::new(pipeline_config), device_config)?;
        Ok(Sim {
            config: sim_config,
            top,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn load(&mut self, commands: Vec<Command>) -> Result<(), SimError> {
        info!("loaded {} commands", commands.len());
        self.top.feed(commands)?;
        Ok(())
    }

    /// Run until every loaded command has retired or the cycle limit is hit.
    pub fn simulate(&mut self) -> RunSummary {
        let logger = if self.config.perf_log {
            stats_logger()
        } else {
            None
        };
        self.run(logger.as_deref())
    }

    /// `simulate` with an explicit stats log.  Records go out every `stats_interval` cycles, plus
    /// one for the final cycle, and the log is flushed before returning.
    pub fn run(&mut self, logger: Option<&StatsLog>) -> RunSummary {
        let interval = self.config.stats_interval.max(1);

        let mut timed_out = true;
        for _ in 0..self.config.timeout {
            if self.top.drained() {
                timed_out = false;
                break;
            }
            self.top.tick();
            let now = self.top.now();
            if now % interval == 0 {
                if let Some(log) = logger {
                    log.write(&StatsRecord::snapshot(now, &self.top));
                }
            }
        }
        if timed_out && self.top.drained() {
            timed_out = false;
        }

        if let Some(log) = logger {
            let now = self.top.now();
            if now % interval != 0 {
                log.write(&StatsRecord::snapshot(now, &self.top));
            }
            if let Err(err) = log.flush() {
                warn!("cannot flush stats log: {}", err);
            }
        }

        if timed_out {
            warn!(
                "timed out after {} cycles with {} requests live",
                self.config.timeout,
                self.top.ingress.live_requests()
            );
        } else {
            info!("simulation drained after {} cycles", self.top.now());
        }
        RunSummary::new(self.top.report(), &self.config, self.top.config(), timed_out)
    }
}
