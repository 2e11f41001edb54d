use std::sync::Arc;

use log::{debug, error};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, OutputPort, Port};
use crate::builtin::id_map::IdAllocator;
use crate::pipeline::layout::{Cdb, DeviceCommand, SQE_LEN};
use crate::pipeline::queue_pool::{PoolError, SharedPool};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

/// Page size of the modeled transfer region.
pub const PAGE_SIZE: u64 = 4096;

/// Submission fields recovered from the record and its CDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSubmission {
    pub request_id: RequestId,
    pub kind: OpKind,
    pub lba: u64,
    pub sectors: u32,
    pub buffer: u64,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRegion {
    pub parsed: ParsedSubmission,
    pub prp1: u64,
    pub prp2: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitFsm {
    #[default]
    Idle,
    FetchSubmission,
    ParseSubmission(SubmissionRecord),
    PrepareTransferRegion(ParsedSubmission),
    BuildCommand(TransferRegion),
    SelectQueue(RequestId, DeviceQueueEntry),
    /// Held here while the selected queue is full.
    SubmitCommand(IssuedCommand),
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitState {
    pub fsm: SubmitFsm,
    /// Queue the next submission goes to.
    pub rr_next: usize,
    op_ids: IdAllocator,
}

/// First and second PRP entries for a buffer of `length` bytes at `buffer`.
///
/// A transfer inside one page needs only PRP1; one crossing into a second page points PRP2 at
/// that page; anything longer points PRP2 at a PRP list placed on the page after the buffer.
pub fn transfer_region(buffer: u64, length: u32) -> (u64, u64) {
    let first_page_bytes = PAGE_SIZE - (buffer % PAGE_SIZE);
    let length = length as u64;
    let prp2 = if length <= first_page_bytes {
        0
    } else if length <= first_page_bytes + PAGE_SIZE {
        (buffer / PAGE_SIZE + 1) * PAGE_SIZE
    } else {
        (buffer + length).next_multiple_of(PAGE_SIZE)
    };
    (buffer, prp2)
}

/// Device-Submission Stage.
///
/// Turns submission records into device commands, gives each an operation id, and places them on
/// the device queues in strict round-robin order.  The selected queue is never skipped: when it is
/// full the command waits in `SubmitCommand` until a completion frees a slot there.
pub struct DeviceSubmission {
    base: ModuleBase<SubmitState, PipelineConfig>,
    pool: SharedPool,
    pub record_in: Port<InputPort, SubmissionRecord>,
    pub device_out: Port<OutputPort, IssuedCommand>,
    pulses: PulseBuffer,
    issued: u64,
    cdb_mismatches: u64,
}

module!(DeviceSubmission, SubmitState, PipelineConfig);

impl DeviceSubmission {
    pub fn new(config: Arc<PipelineConfig>, pool: SharedPool) -> Self {
        let mut me = DeviceSubmission {
            base: ModuleBase::with_state(Self::initial_state(&config)),
            pool,
            record_in: Port::new(),
            device_out: Port::new(),
            pulses: PulseBuffer::new(),
            issued: 0,
            cdb_mismatches: 0,
        };
        me.init_conf(config);
        me
    }

    fn initial_state(config: &PipelineConfig) -> SubmitState {
        SubmitState {
            fsm: SubmitFsm::Idle,
            rr_next: 0,
            op_ids: IdAllocator::new(config.op_id_bits),
        }
    }

    pub fn commands_issued(&self) -> u64 {
        self.issued
    }

    pub fn cdb_mismatches(&self) -> u64 {
        self.cdb_mismatches
    }

    pub fn next_queue(&self) -> usize {
        self.state().rr_next
    }

    fn stall(&mut self, reason: StallReason) {
        self.pulses.push(Pulse::Stall {
            stage: StageId::Submission,
            reason,
        });
    }

    fn violation(&mut self, what: &'static str) {
        self.pulses.push(Pulse::InvariantViolation {
            stage: StageId::Submission,
            what,
        });
    }

    /// Read the record back through its CDB.  The typed fields are authoritative if the two
    /// disagree.
    fn parse(&mut self, record: &SubmissionRecord) -> ParsedSubmission {
        let expected = Cdb {
            kind: record.kind,
            lba: record.lba,
            sectors: record.sectors,
        };
        match Cdb::decode(&record.cdb) {
            Ok(cdb) if cdb == expected => {}
            Ok(cdb) => {
                error!(
                    "request {}: CDB {:?} disagrees with record {:?}",
                    record.request_id, cdb, expected
                );
                self.cdb_mismatches += 1;
                self.violation("CDB disagrees with submission record");
            }
            Err(err) => {
                error!("request {}: bad CDB: {}", record.request_id, err);
                self.cdb_mismatches += 1;
                self.violation("undecodable CDB");
            }
        }
        ParsedSubmission {
            request_id: record.request_id,
            kind: record.kind,
            lba: record.lba,
            sectors: record.sectors,
            buffer: record.buffer,
            length: record.length,
        }
    }

    fn step(&mut self, mut state: SubmitState) -> SubmitState {
        state.fsm = match state.fsm {
            SubmitFsm::Idle => {
                if self.record_in.is_empty() {
                    SubmitFsm::Idle
                } else {
                    SubmitFsm::FetchSubmission
                }
            }
            SubmitFsm::FetchSubmission => match self.record_in.get() {
                Some(record) => SubmitFsm::ParseSubmission(record),
                None => SubmitFsm::Idle,
            },
            SubmitFsm::ParseSubmission(record) => {
                SubmitFsm::PrepareTransferRegion(self.parse(&record))
            }
            SubmitFsm::PrepareTransferRegion(parsed) => {
                let (prp1, prp2) = transfer_region(parsed.buffer, parsed.length);
                SubmitFsm::BuildCommand(TransferRegion { parsed, prp1, prp2 })
            }
            SubmitFsm::BuildCommand(region) => {
                let op_id = state.op_ids.peek() as OpId;
                if self.pool.read().expect("rw lock poisoned").is_op_live(op_id) {
                    self.stall(StallReason::OpIdBusy);
                    SubmitFsm::BuildCommand(region)
                } else {
                    state.op_ids.advance();
                    let parsed = region.parsed;
                    let command = DeviceCommand {
                        kind: parsed.kind,
                        op_id,
                        namespace: self.conf().namespace_id,
                        prp1: region.prp1,
                        prp2: region.prp2,
                        slba: parsed.lba,
                        blocks: parsed.sectors,
                    };
                    let entry = DeviceQueueEntry::encode(&command).unwrap_or_else(|err| {
                        // a zeroed entry carries no opcode; the device fails it back
                        error!(
                            "request {}: cannot pack device command: {}",
                            parsed.request_id, err
                        );
                        self.violation("device command does not fit the submission entry");
                        DeviceQueueEntry {
                            op_id,
                            sqe: [0; SQE_LEN],
                        }
                    });
                    SubmitFsm::SelectQueue(parsed.request_id, entry)
                }
            }
            SubmitFsm::SelectQueue(request_id, entry) => {
                // occupancy-blind: the rotation alone decides
                let queue = state.rr_next;
                state.rr_next = (queue + 1) % self.conf().num_queues;
                SubmitFsm::SubmitCommand(IssuedCommand {
                    queue,
                    request_id,
                    entry,
                })
            }
            SubmitFsm::SubmitCommand(issued) => self.submit(issued),
        };
        state
    }

    fn submit(&mut self, issued: IssuedCommand) -> SubmitFsm {
        let staged = {
            let mut pool = self.pool.write().expect("rw lock poisoned");
            if !pool.has_room(issued.queue) {
                Err(StallReason::QueueFull)
            } else if self.device_out.blocked() {
                Err(StallReason::Backpressure)
            } else {
                pool.stage_submit(issued.queue, issued.request_id, issued.entry)
                    .map_err(|err| match err {
                        PoolError::OpIdLive(_) => StallReason::OpIdBusy,
                        _ => StallReason::QueueFull,
                    })
            }
        };
        if let Err(reason) = staged {
            self.stall(reason);
            return SubmitFsm::SubmitCommand(issued);
        }

        let sent = self.device_out.put(&issued);
        debug_assert!(sent);
        self.issued += 1;
        debug!(
            "request {} issued as op {} on queue {}",
            issued.request_id,
            issued.op_id(),
            issued.queue
        );
        self.pulses.push(Pulse::DeviceCommandIssued {
            request_id: issued.request_id,
            op_id: issued.op_id(),
            queue: issued.queue,
        });
        SubmitFsm::Idle
    }
}

impl ModuleBehaviors for DeviceSubmission {
    fn tick_one(&mut self) {
        let next = self.step(*self.state());
        self.stage_next(next);
    }

    fn commit(&mut self) {
        self.base.commit();
    }

    fn reset(&mut self) {
        self.base.state = Self::initial_state(self.conf());
        self.base.next = None;
        self.pulses.clear();
        self.issued = 0;
        self.cdb_mismatches = 0;
    }
}

impl PulseSource for DeviceSubmission {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
