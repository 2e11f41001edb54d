use std::sync::Arc;

use log::{debug, warn};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, OutputPort, Port};
use crate::pipeline::layout::{Cdb, MAX_BLOCKS_PER_COMMAND};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

/// Block range worked out for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub packet: RequestPacket,
    pub lba: u64,
    pub sectors: u32,
    /// Bytes actually covered, after clamping.
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslateFsm {
    #[default]
    Idle,
    Fetch,
    Parse(RequestPacket),
    BufferPrep(BlockRange),
    Build(BlockRange),
    Queue(SubmissionRecord),
    Complete(SubmissionRecord),
}

/// Number of sectors a transfer of `length` bytes needs.
pub fn sector_count(length: u32, sector_size: u32) -> u64 {
    (length as u64).div_ceil(sector_size as u64)
}

/// Block-Translation Stage: maps a request packet's byte range onto device blocks and builds the
/// submission record, CDB included.
pub struct BlockTranslation {
    base: ModuleBase<TranslateFsm, PipelineConfig>,
    pub packet_in: Port<InputPort, RequestPacket>,
    pub record_out: Port<OutputPort, SubmissionRecord>,
    pulses: PulseBuffer,
    built: u64,
    clamped: u64,
}

module!(BlockTranslation, TranslateFsm, PipelineConfig);

impl BlockTranslation {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let mut me = BlockTranslation {
            base: ModuleBase::default(),
            packet_in: Port::new(),
            record_out: Port::new(),
            pulses: PulseBuffer::new(),
            built: 0,
            clamped: 0,
        };
        me.init_conf(config);
        me
    }

    pub fn records_built(&self) -> u64 {
        self.built
    }

    pub fn clamped_transfers(&self) -> u64 {
        self.clamped
    }

    /// Work out the block range, clamping transfers a single device command cannot carry.
    pub fn block_range(&mut self, packet: RequestPacket) -> BlockRange {
        let sector_size = self.conf().sector_size;
        let requested = sector_count(packet.buffer.length, sector_size);
        let (sectors, length) = if requested > MAX_BLOCKS_PER_COMMAND as u64 {
            let granted_bytes = MAX_BLOCKS_PER_COMMAND as u64 * sector_size as u64;
            let length = granted_bytes.min(packet.buffer.length as u64) as u32;
            warn!(
                "request {}: {} sectors exceed one command, clamped to {}",
                packet.request_id, requested, MAX_BLOCKS_PER_COMMAND
            );
            self.clamped += 1;
            self.pulses.push(Pulse::TransferClamped {
                request_id: packet.request_id,
                requested,
                granted: MAX_BLOCKS_PER_COMMAND,
            });
            (MAX_BLOCKS_PER_COMMAND, length)
        } else {
            (requested as u32, packet.buffer.length)
        };
        BlockRange {
            packet,
            lba: packet.address / sector_size as u64,
            sectors,
            length,
        }
    }

    fn build_record(&self, range: &BlockRange) -> SubmissionRecord {
        let cdb = Cdb {
            kind: range.packet.kind,
            lba: range.lba,
            sectors: range.sectors,
        };
        SubmissionRecord {
            request_id: range.packet.request_id,
            lba: range.lba,
            sectors: range.sectors,
            kind: range.packet.kind,
            timeout: self.conf().timeout_cycles,
            cdb: cdb.encode(),
            buffer: range.packet.buffer.handle,
            length: range.length,
        }
    }

    fn step(&mut self, current: TranslateFsm) -> TranslateFsm {
        match current {
            TranslateFsm::Idle => {
                if self.packet_in.is_empty() {
                    TranslateFsm::Idle
                } else {
                    TranslateFsm::Fetch
                }
            }
            TranslateFsm::Fetch => match self.packet_in.get() {
                Some(packet) => TranslateFsm::Parse(packet.descend()),
                None => TranslateFsm::Idle,
            },
            TranslateFsm::Parse(packet) => TranslateFsm::BufferPrep(self.block_range(packet)),
            // buffer registration is always ready and answers in one cycle
            TranslateFsm::BufferPrep(range) => TranslateFsm::Build(range),
            TranslateFsm::Build(range) => TranslateFsm::Queue(self.build_record(&range)),
            TranslateFsm::Queue(record) => {
                if self.record_out.put(&record) {
                    TranslateFsm::Complete(record)
                } else {
                    self.pulses.push(Pulse::Stall {
                        stage: StageId::Translation,
                        reason: StallReason::Backpressure,
                    });
                    TranslateFsm::Queue(record)
                }
            }
            TranslateFsm::Complete(record) => {
                self.built += 1;
                debug!(
                    "translated request {}: lba={} sectors={}",
                    record.request_id, record.lba, record.sectors
                );
                self.pulses.push(Pulse::TranslationComplete {
                    request_id: record.request_id,
                    sectors: record.sectors,
                });
                TranslateFsm::Idle
            }
        }
    }
}

impl ModuleBehaviors for BlockTranslation {
    fn tick_one(&mut self) {
        let next = self.step(*self.state());
        self.stage_next(next);
    }

    fn commit(&mut self) {
        self.base.commit();
    }

    fn reset(&mut self) {
        self.base.state = TranslateFsm::Idle;
        self.base.next = None;
        self.pulses.clear();
        self.built = 0;
        self.clamped = 0;
    }
}

impl PulseSource for BlockTranslation {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
