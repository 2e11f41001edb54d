use std::env;
use std::fmt;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::pipeline::stats::{LatencySummary, PipelineCounters, PipelineReport};
use crate::sim::config::{PipelineConfig, SimConfig};
use crate::sim::top::PipelineTop;
use crate::timeq::Cycle;

static PERF_RUN_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn perf_run_dir() -> Option<PathBuf> {
    if let Some(path) = PERF_RUN_DIR.get() {
        return Some(path.clone());
    }

    let root = env::var("STORPIPE_PERF_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("performance_logs"));
    if fs::create_dir_all(&root).is_err() {
        return None;
    }

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let pid = std::process::id();
    let run_dir = root.join(format!("run_{ts}_{pid}"));
    if fs::create_dir_all(&run_dir).is_err() {
        return None;
    }

    let _ = PERF_RUN_DIR.set(run_dir.clone());
    Some(run_dir)
}

/// Periodic progress record, one JSON line each.
#[derive(Debug, Serialize)]
pub struct StatsRecord {
    pub cycle: Cycle,
    pub counters: PipelineCounters,
    pub latency: LatencySummary,
    pub queue_occupancy: Vec<usize>,
    pub inflight: usize,
}

impl StatsRecord {
    pub fn snapshot(cycle: Cycle, top: &PipelineTop) -> Self {
        Self {
            cycle,
            counters: *top.stats().counters(),
            latency: top.stats().latency(),
            queue_occupancy: top.queue_occupancy(),
            inflight: top.inflight(),
        }
    }
}

pub struct StatsLog {
    writer: Mutex<BufWriter<File>>,
}

impl StatsLog {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }

    pub(crate) fn write<T: Serialize>(&self, record: &T) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Ok(payload) = serde_json::to_string(record) {
                let _ = writeln!(guard, "{payload}");
            }
        }
    }

    /// The logger lives in a static and is never dropped, so buffered records only reach disk
    /// through this.
    pub fn flush(&self) -> std::io::Result<()> {
        match self.writer.lock() {
            Ok(mut guard) => guard.flush(),
            Err(_) => Err(std::io::Error::other("stats log lock poisoned")),
        }
    }
}

static STATS_LOGGER: OnceLock<Option<Arc<StatsLog>>> = OnceLock::new();

fn create_stats_logger() -> Option<Arc<StatsLog>> {
    perf_run_dir().and_then(|run_dir| {
        StatsLog::create(&run_dir.join("stats.jsonl"))
            .ok()
            .map(Arc::new)
    })
}

pub fn stats_logger() -> Option<Arc<StatsLog>> {
    STATS_LOGGER.get_or_init(create_stats_logger).clone()
}

/// Wall-time view of a run at the configured model clock.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IopsAnalysis {
    pub wall_time_us: f64,
    pub overall_iops: f64,
    pub read_iops: f64,
    pub write_iops: f64,
    pub bandwidth_mb_s: f64,
    pub avg_latency_us: f64,
    pub p50_latency_us: f64,
    pub p95_latency_us: f64,
    pub p99_latency_us: f64,
    /// One operation at a time, at the given latency.
    pub peak_iops_p50: f64,
    pub peak_iops_p95: f64,
    pub peak_iops_p99: f64,
    pub peak_iops_avg: f64,
}

fn per_second(count: u64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

fn peak_iops(latency_us: f64) -> f64 {
    if latency_us > 0.0 {
        1_000_000.0 / latency_us
    } else {
        0.0
    }
}

impl IopsAnalysis {
    pub fn new(report: &PipelineReport, cycles_per_us: f64) -> Self {
        let to_us = |cycles: f64| cycles / cycles_per_us;
        let wall_time_us = to_us(report.total_cycles as f64);
        let seconds = wall_time_us / 1_000_000.0;
        let c = &report.counters;
        let l = &report.latency;
        let p = &l.percentiles;
        let avg_latency_us = to_us(l.avg);
        let p50_latency_us = to_us(p.p50 as f64);
        let p95_latency_us = to_us(p.p95 as f64);
        let p99_latency_us = to_us(p.p99 as f64);
        Self {
            wall_time_us,
            overall_iops: per_second(c.packets_retired, seconds),
            read_iops: per_second(c.reads, seconds),
            write_iops: per_second(c.writes, seconds),
            bandwidth_mb_s: per_second(c.total_bytes(), seconds) / 1_000_000.0,
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
            peak_iops_p50: peak_iops(p50_latency_us),
            peak_iops_p95: peak_iops(p95_latency_us),
            peak_iops_p99: peak_iops(p99_latency_us),
            peak_iops_avg: peak_iops(avg_latency_us),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub num_queues: usize,
    pub queue_depth: usize,
    pub clock_mhz: f64,
    pub timed_out: bool,
    pub report: PipelineReport,
    pub iops: IopsAnalysis,
}

impl RunSummary {
    pub fn new(
        report: PipelineReport,
        sim: &SimConfig,
        pipeline: &PipelineConfig,
        timed_out: bool,
    ) -> Self {
        Self {
            num_queues: pipeline.num_queues,
            queue_depth: pipeline.queue_depth,
            clock_mhz: sim.clock_mhz,
            timed_out,
            iops: IopsAnalysis::new(&report, sim.cycles_per_us()),
            report,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i = &self.iops;
        writeln!(
            f,
            "=== storpipe: {} queues x {} deep @ {} MHz{} ===",
            self.num_queues,
            self.queue_depth,
            self.clock_mhz,
            if self.timed_out { " (TIMED OUT)" } else { "" }
        )?;
        writeln!(f, "{}", self.report)?;
        writeln!(f, "wall time:           {:.2} us", i.wall_time_us)?;
        writeln!(
            f,
            "IOPS:                {:.2} overall, {:.2} read, {:.2} write",
            i.overall_iops, i.read_iops, i.write_iops
        )?;
        writeln!(f, "bandwidth:           {:.2} MB/s", i.bandwidth_mb_s)?;
        writeln!(
            f,
            "latency (us):        avg {:.3} p50 {:.3} p95 {:.3} p99 {:.3}",
            i.avg_latency_us, i.p50_latency_us, i.p95_latency_us, i.p99_latency_us
        )?;
        write!(
            f,
            "peak IOPS (single op): p50 {:.2} p95 {:.2} p99 {:.2} avg {:.2}",
            i.peak_iops_p50, i.peak_iops_p95, i.peak_iops_p99, i.peak_iops_avg
        )
    }
}

/// Write the summary as pretty JSON to `path`, or into the run directory when no path is given.
pub fn write_summary(summary: &RunSummary, path: Option<&Path>) -> std::io::Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => perf_run_dir()
            .ok_or_else(|| std::io::Error::other("no performance log directory"))?
            .join("summary.json"),
    };
    let payload = serde_json::to_string_pretty(summary)?;
    fs::write(&path, payload)?;
    Ok(path)
}
