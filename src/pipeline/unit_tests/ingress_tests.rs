use std::sync::Arc;

use crate::base::behavior::*;
use crate::base::port::{tie_off, tie_off_input, ChannelRef};
use crate::pipeline::ingress::CommandIngress;
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

struct Rig {
    ingress: CommandIngress,
    out: ChannelRef<AcceptedCommand>,
    credits: ChannelRef<RequestId>,
    pulses: Vec<Pulse>,
}

impl Rig {
    fn new(config: PipelineConfig, out_depth: usize) -> Self {
        let mut ingress = CommandIngress::new(Arc::new(config));
        let out = tie_off(&mut ingress.cmd_out, out_depth);
        let credits = tie_off_input(&mut ingress.retire_in, 16);
        Rig {
            ingress,
            out,
            credits,
            pulses: Vec::new(),
        }
    }

    fn cycle(&mut self) {
        self.ingress.tick_one();
        self.out.commit();
        self.credits.commit();
        self.ingress.commit();
        self.ingress.drain_pulses(&mut self.pulses);
    }

    fn credit(&mut self, id: RequestId) {
        assert!(self.credits.put_owned(id));
        self.credits.commit();
    }

    fn drain(&mut self) -> Vec<RequestId> {
        std::iter::from_fn(|| self.out.get())
            .map(|a| a.request_id)
            .collect()
    }

    fn stalls(&self, reason: StallReason) -> usize {
        self.pulses
            .iter()
            .filter(|p| matches!(p, Pulse::Stall { reason: r, .. } if *r == reason))
            .count()
    }
}

fn commands(n: u64) -> Vec<Command> {
    (0..n).map(|i| Command::write(i * 4096, 4096, i)).collect()
}

#[test]
fn one_command_per_cycle_in_order() {
    let mut rig = Rig::new(PipelineConfig::default(), 8);
    rig.ingress.feed(commands(3));
    rig.cycle();
    assert_eq!(1, rig.out.len());
    rig.cycle();
    rig.cycle();
    assert_eq!(vec![0, 1, 2], rig.drain());
    assert_eq!(3, rig.ingress.accepted());
    assert_eq!(0, rig.ingress.pending());
}

#[test]
fn holds_command_while_output_is_full() {
    let mut rig = Rig::new(PipelineConfig::default(), 1);
    rig.ingress.feed(commands(2));
    for _ in 0..5 {
        rig.cycle();
    }
    assert_eq!(1, rig.out.len());
    assert_eq!(4, rig.stalls(StallReason::Backpressure));
    assert_eq!(vec![0], rig.drain());
    // the slot freed outside a cycle only counts from the next commit on
    rig.cycle();
    assert!(rig.drain().is_empty());
    rig.cycle();
    assert_eq!(vec![1], rig.drain());
}

#[test]
fn inflight_limit_waits_for_retire_credit() {
    let config = PipelineConfig {
        max_inflight: 2,
        ..PipelineConfig::default()
    };
    let mut rig = Rig::new(config, 8);
    rig.ingress.feed(commands(3));
    for _ in 0..4 {
        rig.cycle();
    }
    assert_eq!(vec![0, 1], rig.drain());
    assert!(rig.stalls(StallReason::InflightLimit) >= 2);

    rig.credit(0);
    rig.cycle();
    assert_eq!(vec![2], rig.drain());
    assert_eq!(2, rig.ingress.live_requests());
}

#[test]
fn wrapped_request_id_not_reissued_while_live() {
    let config = PipelineConfig {
        request_id_bits: 2,
        max_inflight: 4,
        ..PipelineConfig::default()
    };
    let mut rig = Rig::new(config, 8);
    rig.ingress.feed(commands(5));
    for _ in 0..4 {
        rig.cycle();
    }
    assert_eq!(vec![0, 1, 2, 3], rig.drain());

    for id in 1..4 {
        rig.credit(id);
    }
    rig.cycle();
    rig.cycle();
    assert!(rig.drain().is_empty());
    assert!(rig.stalls(StallReason::RequestIdBusy) >= 1);

    rig.credit(0);
    rig.cycle();
    assert_eq!(vec![0], rig.drain());
}
