use std::sync::Arc;

use crate::base::behavior::*;
use crate::base::port::{tie_off, tie_off_input, ChannelRef};
use crate::pipeline::layout::{Cdb, MAX_BLOCKS_PER_COMMAND};
use crate::pipeline::translate::{sector_count, BlockTranslation};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

struct Rig {
    stage: BlockTranslation,
    packets: ChannelRef<RequestPacket>,
    records: ChannelRef<SubmissionRecord>,
    pulses: Vec<Pulse>,
}

impl Rig {
    fn new() -> Self {
        let mut stage = BlockTranslation::new(Arc::new(PipelineConfig::default()));
        let packets = tie_off_input(&mut stage.packet_in, 4);
        let records = tie_off(&mut stage.record_out, 4);
        Rig {
            stage,
            packets,
            records,
            pulses: Vec::new(),
        }
    }

    fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            self.stage.tick_one();
            self.packets.commit();
            self.records.commit();
            self.stage.commit();
            self.stage.drain_pulses(&mut self.pulses);
        }
    }

    fn send(&mut self, request_id: RequestId, kind: OpKind, address: u64, length: u32) {
        let packet = RequestPacket {
            request_id,
            kind,
            status: RequestStatus::InFlight,
            address,
            buffer: BufferDescriptor {
                handle: 0x1_0000_0000,
                length,
                pattern: 0,
            },
            cancel: false,
            stack_location: 1,
        };
        assert!(self.packets.put_owned(packet));
        self.packets.commit();
    }
}

#[test]
fn sector_count_rounds_up() {
    assert_eq!(1, sector_count(1, 512));
    assert_eq!(1, sector_count(512, 512));
    assert_eq!(2, sector_count(513, 512));
    assert_eq!(8, sector_count(4096, 512));
    assert_eq!(1, sector_count(4096, 4096));
}

#[test]
fn record_carries_block_range_and_cdb() {
    let mut rig = Rig::new();
    rig.send(3, OpKind::Write, 4096, 4096);
    rig.run(10);

    let record = rig.records.get().expect("record built");
    assert_eq!(3, record.request_id);
    assert_eq!(8, record.lba);
    assert_eq!(8, record.sectors);
    assert_eq!(OpKind::Write, record.kind);
    assert_eq!(4096, record.length);
    assert_eq!(0x1_0000_0000, record.buffer);
    assert_eq!(PipelineConfig::default().timeout_cycles, record.timeout);
    assert_eq!(
        Ok(Cdb {
            kind: OpKind::Write,
            lba: 8,
            sectors: 8,
        }),
        Cdb::decode(&record.cdb)
    );
    assert_eq!(1, rig.stage.records_built());
    assert!(rig.pulses.contains(&Pulse::TranslationComplete {
        request_id: 3,
        sectors: 8,
    }));
}

#[test]
fn unaligned_address_rounds_lba_down() {
    let mut rig = Rig::new();
    rig.send(0, OpKind::Read, 1000, 100);
    rig.run(10);
    let record = rig.records.get().expect("record built");
    assert_eq!(1, record.lba);
    assert_eq!(1, record.sectors);
}

#[test]
fn oversized_transfer_is_clamped() {
    let mut rig = Rig::new();
    rig.send(1, OpKind::Read, 0, u32::MAX);
    rig.run(10);
    let record = rig.records.get().expect("record built");
    assert_eq!(MAX_BLOCKS_PER_COMMAND, record.sectors);
    assert_eq!(MAX_BLOCKS_PER_COMMAND * 512, record.length);
    assert_eq!(1, rig.stage.clamped_transfers());
    assert!(rig
        .pulses
        .iter()
        .any(|p| matches!(p, Pulse::TransferClamped { request_id: 1, .. })));
}

#[test]
fn packets_translate_in_order() {
    let mut rig = Rig::new();
    for id in 0..3 {
        rig.send(id, OpKind::Read, id as u64 * 512, 512);
    }
    rig.run(30);
    let ids: Vec<RequestId> = std::iter::from_fn(|| rig.records.get())
        .map(|r| r.request_id)
        .collect();
    assert_eq!(vec![0, 1, 2], ids);
}
