use std::fmt;

use log::warn;
use serde::Serialize;

use crate::builtin::id_map::IdMap;
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

/// Percentile ranks tracked, in basis points.
const P50: u32 = 5_000;
const P90: u32 = 9_000;
const P95: u32 = 9_500;
const P99: u32 = 9_900;
const P999: u32 = 9_990;

/// Index of the `basis_points` percentile in a sorted slice of `count` samples:
/// `ceil(count * p)`, clamped to the last valid index.
pub fn percentile_index(count: usize, basis_points: u32) -> usize {
    if count == 0 {
        return 0;
    }
    let raw = (count as u64 * basis_points as u64).div_ceil(10_000);
    (raw as usize).min(count - 1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub p50: u32,
    pub p90: u32,
    pub p95: u32,
    pub p99: u32,
    pub p999: u32,
}

impl Percentiles {
    /// `sorted` must be in ascending order.
    pub fn from_sorted(sorted: &[u32]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        let at = |bp| sorted[percentile_index(sorted.len(), bp)];
        Self {
            p50: at(P50),
            p90: at(P90),
            p95: at(P95),
            p99: at(P99),
            p999: at(P999),
        }
    }
}

/// One completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySample {
    pub request_id: RequestId,
    pub start: CycleStamp,
    pub end: CycleStamp,
}

impl LatencySample {
    /// Cycles from acceptance to completion match, valid across one counter wrap.
    pub fn latency(&self) -> u32 {
        self.end.wrapping_sub(self.start)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineCounters {
    pub commands_accepted: u64,
    pub reads: u64,
    pub writes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub packets_created: u64,
    pub submissions_built: u64,
    pub commands_issued: u64,
    pub completions_matched: u64,
    /// Completions that carried a non-zero device status.
    pub completion_errors: u64,
    pub packets_retired: u64,
    pub protocol_errors: u64,
    pub stale_matches: u64,
    pub transfers_clamped: u64,
    pub invariant_violations: u64,
}

impl PipelineCounters {
    pub fn total_bytes(&self) -> u64 {
        self.read_bytes.saturating_add(self.write_bytes)
    }
}

/// Stall cycles by cause, summed over stages.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StallSummary {
    pub backpressure: u64,
    pub request_id_busy: u64,
    pub inflight_limit: u64,
    pub no_packet_slot: u64,
    pub queue_full: u64,
    pub op_id_busy: u64,
}

impl StallSummary {
    fn count(&mut self, reason: StallReason) {
        let slot = match reason {
            StallReason::Backpressure => &mut self.backpressure,
            StallReason::RequestIdBusy => &mut self.request_id_busy,
            StallReason::InflightLimit => &mut self.inflight_limit,
            StallReason::NoPacketSlot => &mut self.no_packet_slot,
            StallReason::QueueFull => &mut self.queue_full,
            StallReason::OpIdBusy => &mut self.op_id_busy,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min: u32,
    pub max: u32,
    pub avg: f64,
    pub std_dev: f64,
    #[serde(flatten)]
    pub percentiles: Percentiles,
}

/// Statistics Collector.
///
/// Pure observer: it sees the pulses every stage emitted during a cycle and never feeds anything
/// back into the pipeline.
#[derive(Debug)]
pub struct StatsCollector {
    cycle: CycleStamp,
    total_cycles: u64,
    start: IdMap<CycleStamp>,
    history: Vec<LatencySample>,
    history_capacity: usize,
    /// Next history slot to overwrite once the ring is full.
    history_head: usize,
    count: u64,
    min: u32,
    max: u32,
    sum: u64,
    sum_sq: u128,
    percentiles: Percentiles,
    percentile_interval: usize,
    since_recompute: usize,
    counters: PipelineCounters,
    stalls: StallSummary,
}

impl StatsCollector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            cycle: 0,
            total_cycles: 0,
            start: IdMap::new(config.request_id_bits),
            history: Vec::with_capacity(config.latency_history),
            history_capacity: config.latency_history,
            history_head: 0,
            count: 0,
            min: u32::MAX,
            max: 0,
            sum: 0,
            sum_sq: 0,
            percentiles: Percentiles::default(),
            percentile_interval: config.percentile_interval,
            since_recompute: 0,
            counters: PipelineCounters::default(),
            stalls: StallSummary::default(),
        }
    }

    /// Start the stamp counter somewhere other than zero.
    pub fn with_start_cycle(mut self, cycle: CycleStamp) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn cycle(&self) -> CycleStamp {
        self.cycle
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn stalls(&self) -> &StallSummary {
        &self.stalls
    }

    /// Latest computed percentiles; refreshed every `percentile_interval` samples.
    pub fn percentiles(&self) -> Percentiles {
        self.percentiles
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> Vec<LatencySample> {
        if self.history.len() < self.history_capacity {
            return self.history.clone();
        }
        let (newer, older) = self.history.split_at(self.history_head);
        older.iter().chain(newer).copied().collect()
    }

    /// Account one cycle's worth of pulses, stamped with the current cycle.
    pub fn observe(&mut self, pulses: &[Pulse]) {
        for pulse in pulses {
            self.observe_one(pulse);
        }
    }

    fn observe_one(&mut self, pulse: &Pulse) {
        let c = &mut self.counters;
        match *pulse {
            Pulse::CommandAccepted {
                request_id,
                kind,
                bytes,
            } => {
                c.commands_accepted += 1;
                match kind {
                    OpKind::Read => {
                        c.reads += 1;
                        c.read_bytes += bytes as u64;
                    }
                    OpKind::Write => {
                        c.writes += 1;
                        c.write_bytes += bytes as u64;
                    }
                }
                if self.start.insert(request_id, self.cycle).is_err() {
                    warn!("request {} accepted while its start stamp is live", request_id);
                    c.invariant_violations += 1;
                }
            }
            Pulse::PacketCreated { .. } => c.packets_created += 1,
            Pulse::TranslationComplete { .. } => c.submissions_built += 1,
            Pulse::TransferClamped { .. } => c.transfers_clamped += 1,
            Pulse::DeviceCommandIssued { .. } => c.commands_issued += 1,
            Pulse::CompletionMatched {
                request_id, status, ..
            } => {
                c.completions_matched += 1;
                if status != DEVICE_STATUS_SUCCESS {
                    c.completion_errors += 1;
                }
                match self.start.remove(request_id) {
                    Some(start) => self.record(LatencySample {
                        request_id,
                        start,
                        end: self.cycle,
                    }),
                    None => {
                        warn!("completion for request {} with no start stamp", request_id);
                        c.invariant_violations += 1;
                    }
                }
            }
            Pulse::UnmappedCompletion { .. } => c.protocol_errors += 1,
            Pulse::PacketRetired { .. } => c.packets_retired += 1,
            Pulse::StaleMatch { .. } => c.stale_matches += 1,
            Pulse::Stall { reason, .. } => self.stalls.count(reason),
            Pulse::InvariantViolation { .. } => c.invariant_violations += 1,
        }
    }

    fn record(&mut self, sample: LatencySample) {
        let latency = sample.latency();
        self.count += 1;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.sum = self.sum.saturating_add(latency as u64);
        self.sum_sq = self.sum_sq.saturating_add(latency as u128 * latency as u128);

        if self.history.len() < self.history_capacity {
            self.history.push(sample);
        } else {
            self.history[self.history_head] = sample;
            self.history_head = (self.history_head + 1) % self.history_capacity;
        }

        self.since_recompute += 1;
        if self.since_recompute >= self.percentile_interval {
            self.recompute_percentiles();
        }
    }

    fn recompute_percentiles(&mut self) {
        let mut sorted: Vec<u32> = self.history.iter().map(LatencySample::latency).collect();
        sorted.sort_unstable();
        self.percentiles = Percentiles::from_sorted(&sorted);
        self.since_recompute = 0;
    }

    /// End of a cycle.
    pub fn advance(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
        self.total_cycles += 1;
    }

    /// Bring the percentiles up to date with every retained sample.
    pub fn finalize(&mut self) {
        self.recompute_percentiles();
    }

    pub fn latency(&self) -> LatencySummary {
        if self.count == 0 {
            return LatencySummary::default();
        }
        let n = self.count as f64;
        let avg = self.sum as f64 / n;
        let variance = (self.sum_sq as f64 / n - avg * avg).max(0.0);
        LatencySummary {
            count: self.count,
            min: self.min,
            max: self.max,
            avg,
            std_dev: variance.sqrt(),
            percentiles: self.percentiles,
        }
    }

    pub fn reset(&mut self) {
        self.cycle = 0;
        self.total_cycles = 0;
        self.start.clear();
        self.history.clear();
        self.history_head = 0;
        self.count = 0;
        self.min = u32::MAX;
        self.max = 0;
        self.sum = 0;
        self.sum_sq = 0;
        self.percentiles = Percentiles::default();
        self.since_recompute = 0;
        self.counters = PipelineCounters::default();
        self.stalls = StallSummary::default();
    }
}

/// End-of-run statistics for the reporting harness.  All times are in cycles.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub total_cycles: u64,
    pub counters: PipelineCounters,
    pub latency: LatencySummary,
    pub stalls: StallSummary,
    pub max_queue_depth: usize,
    pub submitted_per_queue: Vec<u64>,
    pub out_of_order_completions: u64,
    pub live_requests: usize,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        let l = &self.latency;
        writeln!(f, "cycles:              {}", self.total_cycles)?;
        writeln!(
            f,
            "commands:            {} ({} reads, {} writes)",
            c.commands_accepted, c.reads, c.writes
        )?;
        writeln!(f, "bytes:               {}", c.total_bytes())?;
        writeln!(
            f,
            "stage counts:        {} packets, {} submissions, {} issued, {} matched",
            c.packets_created, c.submissions_built, c.commands_issued, c.completions_matched
        )?;
        writeln!(f, "max queue depth:     {}", self.max_queue_depth)?;
        writeln!(f, "per-queue issues:    {:?}", self.submitted_per_queue)?;
        writeln!(
            f,
            "latency (cycles):    min {} avg {:.1} max {} sd {:.1}",
            l.min, l.avg, l.max, l.std_dev
        )?;
        writeln!(
            f,
            "percentiles:         p50 {} p90 {} p95 {} p99 {} p99.9 {}",
            l.percentiles.p50,
            l.percentiles.p90,
            l.percentiles.p95,
            l.percentiles.p99,
            l.percentiles.p999
        )?;
        write!(
            f,
            "errors:              {} protocol, {} stale, {} device, {} invariant",
            c.protocol_errors, c.stale_matches, c.completion_errors, c.invariant_violations
        )
    }
}
