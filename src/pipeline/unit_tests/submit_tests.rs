use std::sync::Arc;

use crate::base::behavior::*;
use crate::base::module::IsModule;
use crate::base::port::{tie_off, tie_off_input, ChannelRef};
use crate::pipeline::layout::Cdb;
use crate::pipeline::queue_pool::{DeviceQueuePool, SharedPool};
use crate::pipeline::submit::{transfer_region, DeviceSubmission, SubmitFsm, PAGE_SIZE};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

struct Rig {
    stage: DeviceSubmission,
    pool: SharedPool,
    records: ChannelRef<SubmissionRecord>,
    device: ChannelRef<IssuedCommand>,
    pulses: Vec<Pulse>,
}

impl Rig {
    fn new(num_queues: usize, queue_depth: usize) -> Self {
        let config = PipelineConfig {
            num_queues,
            queue_depth,
            ..PipelineConfig::default()
        };
        let pool = DeviceQueuePool::shared(num_queues, queue_depth, config.op_id_bits);
        let mut stage = DeviceSubmission::new(Arc::new(config), Arc::clone(&pool));
        let records = tie_off_input(&mut stage.record_in, 32);
        let device = tie_off(&mut stage.device_out, 32);
        Rig {
            stage,
            pool,
            records,
            device,
            pulses: Vec::new(),
        }
    }

    fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            self.stage.tick_one();
            self.records.commit();
            self.device.commit();
            self.pool.write().unwrap().commit();
            self.stage.commit();
            self.stage.drain_pulses(&mut self.pulses);
        }
    }

    fn send(&mut self, record: SubmissionRecord) {
        assert!(self.records.put_owned(record));
        self.records.commit();
    }

    fn issued(&mut self) -> Vec<IssuedCommand> {
        std::iter::from_fn(|| self.device.get()).collect()
    }
}

fn record(request_id: RequestId, lba: u64, sectors: u32) -> SubmissionRecord {
    let cdb = Cdb {
        kind: OpKind::Read,
        lba,
        sectors,
    };
    SubmissionRecord {
        request_id,
        lba,
        sectors,
        kind: OpKind::Read,
        timeout: 30_000,
        cdb: cdb.encode(),
        buffer: 0x1_0000_0000 + ((request_id as u64) << 32),
        length: sectors * 512,
    }
}

#[test]
fn transfer_region_by_page_span() {
    assert_eq!((0x1000, 0), transfer_region(0x1000, 512));
    assert_eq!((0x1000, 0), transfer_region(0x1000, PAGE_SIZE as u32));
    assert_eq!((0x1000, 0x2000), transfer_region(0x1000, 8192));
    assert_eq!((0x1800, 0x2000), transfer_region(0x1800, 4096));
    // three pages: PRP2 points at the list on the page after the buffer
    assert_eq!((0x1000, 0x4000), transfer_region(0x1000, 3 * 4096));
}

#[test]
fn round_robin_gives_each_queue_k_commands() {
    let mut rig = Rig::new(3, 4);
    for id in 0..9 {
        rig.send(record(id, id as u64 * 8, 8));
    }
    rig.run(100);

    let issued = rig.issued();
    let queues: Vec<usize> = issued.iter().map(|c| c.queue).collect();
    assert_eq!(vec![0, 1, 2, 0, 1, 2, 0, 1, 2], queues);
    let op_ids: Vec<OpId> = issued.iter().map(|c| c.op_id()).collect();
    assert_eq!((0..9).collect::<Vec<OpId>>(), op_ids);
    assert_eq!(&[3, 3, 3], rig.pool.read().unwrap().submitted_per_queue());
    assert_eq!(9, rig.stage.commands_issued());
}

#[test]
fn device_command_fields() {
    let mut rig = Rig::new(1, 4);
    rig.send(record(2, 16, 16));
    rig.run(10);

    let issued = rig.issued();
    assert_eq!(1, issued.len());
    let command = issued[0].entry.command().unwrap();
    assert_eq!(2, issued[0].request_id);
    assert_eq!(OpKind::Read, command.kind);
    assert_eq!(0, command.op_id);
    assert_eq!(PipelineConfig::default().namespace_id, command.namespace);
    assert_eq!(16, command.slba);
    assert_eq!(16, command.blocks);
    assert_eq!(0x1_0000_0000 + (2u64 << 32), command.prp1);
    assert_eq!(command.prp1 + PAGE_SIZE, command.prp2);
    assert!(rig.pulses.contains(&Pulse::DeviceCommandIssued {
        request_id: 2,
        op_id: 0,
        queue: 0,
    }));
}

#[test]
fn one_command_every_seven_cycles() {
    let mut rig = Rig::new(2, 4);
    rig.send(record(0, 0, 1));
    rig.send(record(1, 1, 1));
    rig.run(7);
    assert_eq!(1, rig.issued().len());
    rig.run(6);
    assert!(rig.issued().is_empty());
    rig.run(1);
    assert_eq!(1, rig.issued().len());
}

#[test]
fn full_queue_is_waited_on_not_skipped() {
    let mut rig = Rig::new(2, 1);
    for id in 0..3 {
        rig.send(record(id, 0, 1));
    }
    rig.run(60);

    let queues: Vec<usize> = rig.issued().iter().map(|c| c.queue).collect();
    assert_eq!(vec![0, 1], queues);
    match rig.stage.state().fsm {
        SubmitFsm::SubmitCommand(held) => {
            assert_eq!(0, held.queue);
            assert_eq!(2, held.request_id);
        }
        other => panic!("expected a held command, found {other:?}"),
    }
    assert!(rig
        .pulses
        .iter()
        .any(|p| matches!(p, Pulse::Stall { reason: StallReason::QueueFull, .. })));

    {
        let mut pool = rig.pool.write().unwrap();
        pool.stage_retire(0).unwrap();
        pool.commit();
    }
    rig.run(2);
    let issued = rig.issued();
    assert_eq!(1, issued.len());
    assert_eq!(0, issued[0].queue);
    assert_eq!(2, issued[0].op_id());
}

#[test]
fn corrupt_cdb_counts_violation_and_uses_record_fields() {
    let mut rig = Rig::new(1, 4);
    let mut bad = record(4, 40, 2);
    bad.cdb = [0; 16];
    rig.send(bad);
    rig.run(10);

    let issued = rig.issued();
    assert_eq!(1, issued.len());
    let command = issued[0].entry.command().unwrap();
    assert_eq!(40, command.slba);
    assert_eq!(2, command.blocks);
    assert_eq!(1, rig.stage.cdb_mismatches());
    assert!(rig
        .pulses
        .iter()
        .any(|p| matches!(p, Pulse::InvariantViolation { stage: StageId::Submission, .. })));
}
