use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::pipeline::layout::{DeviceCommand, LayoutError, CDB_LEN, SQE_LEN};

/// Request identifier, assigned at ingress and wrapped to `request_id_bits`.
pub type RequestId = u32;
/// Operation identifier, assigned at device submission.
pub type OpId = u16;
/// Fixed-width cycle stamp used for latency samples; differences use wrapping arithmetic.
pub type CycleStamp = u32;

pub const DEVICE_STATUS_SUCCESS: u16 = 0;
/// Status the device model reports for an injected failure (generic media error).
pub const DEVICE_STATUS_MEDIA_ERROR: u16 = 0x0281;
/// Status for a submission entry the device cannot decode.
pub const DEVICE_STATUS_INVALID_FIELD: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Read = 0,
    Write = 1,
}

impl OpKind {
    /// Trace opcode: 0 read, 1 write.
    pub fn from_opcode(opcode: u64) -> Option<Self> {
        FromPrimitive::from_u64(opcode)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    pub fn short(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
        }
    }
}

/// One raw command from the external command source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: OpKind,
    pub address: u64,
    pub length: u32,
    pub pattern: u64,
}

impl Command {
    pub fn new(kind: OpKind, address: u64, length: u32, pattern: u64) -> Self {
        Self {
            kind,
            address,
            length,
            pattern,
        }
    }

    pub fn read(address: u64, length: u32) -> Self {
        Self::new(OpKind::Read, address, length, 0)
    }

    pub fn write(address: u64, length: u32, pattern: u64) -> Self {
        Self::new(OpKind::Write, address, length, pattern)
    }

    /// Reject records the pipeline cannot represent.  `index` is the position in the stream.
    pub fn validate(&self, index: usize) -> Result<(), CommandError> {
        if self.length == 0 {
            return Err(CommandError::ZeroLength {
                index,
                address: self.address,
            });
        }
        if self.address.checked_add(self.length as u64).is_none() {
            return Err(CommandError::AddressOverflow {
                index,
                address: self.address,
                length: self.length,
            });
        }
        Ok(())
    }
}

/// Command that passed ingress and owns a request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedCommand {
    pub request_id: RequestId,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    InFlight,
    Complete,
    Error,
}

impl RequestStatus {
    pub fn from_device(status: u16) -> Self {
        if status == DEVICE_STATUS_SUCCESS {
            Self::Complete
        } else {
            Self::Error
        }
    }
}

/// Opaque handle to the data buffer of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDescriptor {
    pub handle: u64,
    pub length: u32,
    pub pattern: u64,
}

/// Internal record of one accepted command as it moves through the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPacket {
    pub request_id: RequestId,
    pub kind: OpKind,
    pub status: RequestStatus,
    pub address: u64,
    pub buffer: BufferDescriptor,
    pub cancel: bool,
    /// Number of stages that have taken the packet so far.
    pub stack_location: u8,
}

impl RequestPacket {
    pub fn descend(mut self) -> Self {
        self.stack_location = self.stack_location.saturating_add(1);
        self
    }
}

/// Device-facing record built by block translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub request_id: RequestId,
    pub lba: u64,
    pub sectors: u32,
    pub kind: OpKind,
    /// Carried through to the device command, never enforced.
    pub timeout: u32,
    pub cdb: [u8; CDB_LEN],
    pub buffer: u64,
    pub length: u32,
}

/// Entry occupying a device queue slot between issue and completion.  The device sees only the
/// packed submission entry; `op_id` is the pool's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQueueEntry {
    pub op_id: OpId,
    pub sqe: [u8; SQE_LEN],
}

impl DeviceQueueEntry {
    pub fn encode(command: &DeviceCommand) -> Result<Self, LayoutError> {
        Ok(Self {
            op_id: command.op_id,
            sqe: command.encode()?,
        })
    }

    pub fn command(&self) -> Result<DeviceCommand, LayoutError> {
        DeviceCommand::decode(&self.sqe)
    }
}

/// Device command as handed to the device, tagged with the queue it was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    pub queue: usize,
    pub request_id: RequestId,
    pub entry: DeviceQueueEntry,
}

impl IssuedCommand {
    pub fn op_id(&self) -> OpId {
        self.entry.op_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCompletion {
    pub op_id: OpId,
    pub status: u16,
}

impl DeviceCompletion {
    pub fn success(op_id: OpId) -> Self {
        Self {
            op_id,
            status: DEVICE_STATUS_SUCCESS,
        }
    }
}

/// Completion matched back to its request, sent to the request-packet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionMatch {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Ingress,
    PacketManager,
    Translation,
    Submission,
    Completion,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// Downstream FIFO full.
    Backpressure,
    /// Next request id still belongs to a live packet.
    RequestIdBusy,
    InflightLimit,
    NoPacketSlot,
    /// Selected device queue has no free slot.
    QueueFull,
    /// Next operation id still mapped.
    OpIdBusy,
}

/// Stage-transition event observed by the statistics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    CommandAccepted {
        request_id: RequestId,
        kind: OpKind,
        bytes: u32,
    },
    PacketCreated {
        request_id: RequestId,
    },
    TranslationComplete {
        request_id: RequestId,
        sectors: u32,
    },
    TransferClamped {
        request_id: RequestId,
        requested: u64,
        granted: u32,
    },
    DeviceCommandIssued {
        request_id: RequestId,
        op_id: OpId,
        queue: usize,
    },
    CompletionMatched {
        request_id: RequestId,
        op_id: OpId,
        queue: usize,
        status: u16,
    },
    UnmappedCompletion {
        op_id: OpId,
    },
    PacketRetired {
        request_id: RequestId,
        status: RequestStatus,
    },
    StaleMatch {
        request_id: RequestId,
    },
    Stall {
        stage: StageId,
        reason: StallReason,
    },
    InvariantViolation {
        stage: StageId,
        what: &'static str,
    },
}

/// Pulses emitted by one module during one cycle.
pub type PulseBuffer = smallvec::SmallVec<[Pulse; 4]>;

/// Module that reports stage transitions to the statistics collector.
pub trait PulseSource {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>);
}
