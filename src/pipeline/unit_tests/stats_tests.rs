use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pipeline::stats::{percentile_index, LatencySample, Percentiles, StatsCollector};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

fn accepted(request_id: RequestId) -> Pulse {
    Pulse::CommandAccepted {
        request_id,
        kind: OpKind::Read,
        bytes: 4096,
    }
}

fn matched(request_id: RequestId) -> Pulse {
    Pulse::CompletionMatched {
        request_id,
        op_id: request_id as OpId,
        queue: 0,
        status: DEVICE_STATUS_SUCCESS,
    }
}

fn advance(stats: &mut StatsCollector, cycles: u32) {
    for _ in 0..cycles {
        stats.advance();
    }
}

#[test]
fn percentile_index_rounds_up_and_clamps() {
    assert_eq!(95, percentile_index(100, 9_500));
    assert_eq!(99, percentile_index(100, 9_900));
    assert_eq!(5, percentile_index(10, 5_000));
    assert_eq!(10 - 1, percentile_index(10, 9_990));
    assert_eq!(0, percentile_index(1, 5_000));
    // 0.95 * 21 = 19.95
    assert_eq!(20, percentile_index(21, 9_500));
}

#[test]
fn percentiles_of_one_to_hundred() {
    let sorted: Vec<u32> = (1..=100).collect();
    assert_eq!(
        Percentiles {
            p50: 51,
            p90: 91,
            p95: 96,
            p99: 100,
            p999: 100,
        },
        Percentiles::from_sorted(&sorted)
    );
    assert_eq!(Percentiles::default(), Percentiles::from_sorted(&[]));
}

#[test]
fn latency_survives_cycle_counter_wrap() {
    let mut stats = StatsCollector::new(&PipelineConfig::default()).with_start_cycle(u32::MAX - 2);
    stats.observe(&[accepted(1)]);
    advance(&mut stats, 5);
    assert_eq!(2, stats.cycle());
    stats.observe(&[matched(1)]);

    let samples = stats.samples();
    assert_eq!(
        vec![LatencySample {
            request_id: 1,
            start: u32::MAX - 2,
            end: 2,
        }],
        samples
    );
    assert_eq!(5, samples[0].latency());
    assert_eq!(5, stats.latency().max);
}

#[test]
fn running_summary() {
    let mut stats = StatsCollector::new(&PipelineConfig::default());
    for (id, latency) in [(0, 10), (1, 20), (2, 30)] {
        stats.observe(&[accepted(id)]);
        advance(&mut stats, latency);
        stats.observe(&[matched(id)]);
    }
    stats.finalize();
    let summary = stats.latency();
    assert_eq!(3, summary.count);
    assert_eq!(10, summary.min);
    assert_eq!(30, summary.max);
    assert!((summary.avg - 20.0).abs() < 1e-9);
    // population standard deviation of 10, 20, 30
    assert!((summary.std_dev - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
    // ceil(3 * 0.5) = 2, the largest of the three
    assert_eq!(30, summary.percentiles.p50);
    assert_eq!(3, stats.counters().reads);
    assert_eq!(3 * 4096, stats.counters().read_bytes);
}

#[test]
fn percentiles_refresh_every_interval() {
    let config = PipelineConfig {
        percentile_interval: 4,
        ..PipelineConfig::default()
    };
    let mut stats = StatsCollector::new(&config);
    for id in 0..3 {
        stats.observe(&[accepted(id)]);
        advance(&mut stats, 7);
        stats.observe(&[matched(id)]);
    }
    assert_eq!(Percentiles::default(), stats.percentiles());
    stats.observe(&[accepted(3)]);
    advance(&mut stats, 7);
    stats.observe(&[matched(3)]);
    assert_eq!(7, stats.percentiles().p99);
}

#[test]
fn percentiles_are_monotonic() {
    let config = PipelineConfig {
        percentile_interval: 8,
        latency_history: 128,
        ..PipelineConfig::default()
    };
    let mut stats = StatsCollector::new(&config);
    let mut rng = StdRng::seed_from_u64(11);
    for id in 0..500 {
        stats.observe(&[accepted(id)]);
        advance(&mut stats, rng.gen_range(1..5_000));
        stats.observe(&[matched(id)]);

        let l = stats.latency();
        let p = l.percentiles;
        if p != Percentiles::default() {
            assert!(l.min <= p.p50);
            assert!(p.p50 <= p.p90 && p.p90 <= p.p95 && p.p95 <= p.p99 && p.p99 <= p.p999);
            assert!(p.p999 <= l.max);
        }
    }
    stats.finalize();
    let l = stats.latency();
    assert!(l.min <= l.percentiles.p50 && l.percentiles.p999 <= l.max);
}

#[test]
fn history_keeps_newest_samples() {
    let config = PipelineConfig {
        latency_history: 4,
        ..PipelineConfig::default()
    };
    let mut stats = StatsCollector::new(&config);
    for id in 0..6 {
        stats.observe(&[accepted(id)]);
        stats.advance();
        stats.observe(&[matched(id)]);
    }
    let ids: Vec<RequestId> = stats.samples().iter().map(|s| s.request_id).collect();
    assert_eq!(vec![2, 3, 4, 5], ids);
    assert_eq!(6, stats.latency().count);
}

#[test]
fn counts_stalls_and_errors() {
    let mut stats = StatsCollector::new(&PipelineConfig::default());
    stats.observe(&[
        Pulse::Stall {
            stage: StageId::Submission,
            reason: StallReason::QueueFull,
        },
        Pulse::Stall {
            stage: StageId::Ingress,
            reason: StallReason::Backpressure,
        },
        Pulse::UnmappedCompletion { op_id: 3 },
        Pulse::StaleMatch { request_id: 1 },
        matched(9),
    ]);
    assert_eq!(1, stats.stalls().queue_full);
    assert_eq!(1, stats.stalls().backpressure);
    assert_eq!(1, stats.counters().protocol_errors);
    assert_eq!(1, stats.counters().stale_matches);
    // a match with no start stamp is counted, not sampled
    assert_eq!(1, stats.counters().invariant_violations);
    assert_eq!(0, stats.latency().count);
}
