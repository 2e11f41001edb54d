//! Packed formats exchanged between stages.
//!
//! Each format is described once, as a table of named byte fields, and both the builder and the
//! parser go through that table.
//!
//! CDB layout v1 (16 bytes, big-endian fields):
//!
//! | bytes  | field                          |
//! |--------|--------------------------------|
//! | 0      | opcode (0x88 read, 0x8A write) |
//! | 1      | layout version (1)             |
//! | 2..10  | starting LBA                   |
//! | 10..14 | sector count                   |
//! | 14..16 | reserved, zero                 |
//!
//! Device submission entry (64 bytes, little-endian fields):
//!
//! | bytes  | field                        |
//! |--------|------------------------------|
//! | 0      | opcode (0x02 read, 0x01 write) |
//! | 2..4   | operation id                 |
//! | 4..8   | namespace                    |
//! | 24..32 | PRP1                         |
//! | 32..40 | PRP2                         |
//! | 40..48 | starting LBA                 |
//! | 48..50 | block count minus one        |

use thiserror::Error;

use crate::pipeline::types::{OpId, OpKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unsupported layout version {0}")]
    BadVersion(u8),
    #[error("block count {0} outside 1..=65536")]
    BlockCount(u32),
    #[error("reserved bytes are not zero")]
    ReservedSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub width: usize,
}

impl Field {
    const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    fn range(self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }

    fn put(self, buf: &mut [u8], endian: Endian, value: u64) {
        debug_assert!(self.width <= 8);
        debug_assert!(
            self.width == 8 || value >> (self.width * 8) == 0,
            "value {value:#x} does not fit a {}-byte field",
            self.width
        );
        let bytes = match endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        let dst = &mut buf[self.range()];
        match endian {
            Endian::Big => dst.copy_from_slice(&bytes[8 - self.width..]),
            Endian::Little => dst.copy_from_slice(&bytes[..self.width]),
        }
    }

    fn get(self, buf: &[u8], endian: Endian) -> u64 {
        let src = &buf[self.range()];
        match endian {
            Endian::Big => src.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
            Endian::Little => src.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }
}

pub const CDB_LEN: usize = 16;
pub const CDB_LAYOUT_VERSION: u8 = 1;

pub mod cdb {
    use super::Field;

    pub const OPCODE: Field = Field::new(0, 1);
    pub const VERSION: Field = Field::new(1, 1);
    pub const LBA: Field = Field::new(2, 8);
    pub const SECTORS: Field = Field::new(10, 4);
    pub const RESERVED: Field = Field::new(14, 2);

    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
}

/// Command descriptor block carried on a submission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    pub kind: OpKind,
    pub lba: u64,
    pub sectors: u32,
}

impl Cdb {
    pub fn encode(&self) -> [u8; CDB_LEN] {
        let mut buf = [0u8; CDB_LEN];
        let opcode = match self.kind {
            OpKind::Read => cdb::READ_16,
            OpKind::Write => cdb::WRITE_16,
        };
        cdb::OPCODE.put(&mut buf, Endian::Big, opcode as u64);
        cdb::VERSION.put(&mut buf, Endian::Big, CDB_LAYOUT_VERSION as u64);
        cdb::LBA.put(&mut buf, Endian::Big, self.lba);
        cdb::SECTORS.put(&mut buf, Endian::Big, self.sectors as u64);
        buf
    }

    pub fn decode(buf: &[u8; CDB_LEN]) -> Result<Self, LayoutError> {
        let version = cdb::VERSION.get(buf, Endian::Big) as u8;
        if version != CDB_LAYOUT_VERSION {
            return Err(LayoutError::BadVersion(version));
        }
        let opcode = cdb::OPCODE.get(buf, Endian::Big) as u8;
        let kind = match opcode {
            cdb::READ_16 => OpKind::Read,
            cdb::WRITE_16 => OpKind::Write,
            other => return Err(LayoutError::UnknownOpcode(other)),
        };
        if cdb::RESERVED.get(buf, Endian::Big) != 0 {
            return Err(LayoutError::ReservedSet);
        }
        Ok(Self {
            kind,
            lba: cdb::LBA.get(buf, Endian::Big),
            sectors: cdb::SECTORS.get(buf, Endian::Big) as u32,
        })
    }
}

pub const SQE_LEN: usize = 64;
/// Largest transfer one device command can describe (16-bit zero-based block count).
pub const MAX_BLOCKS_PER_COMMAND: u32 = 1 << 16;

pub mod sqe {
    use super::Field;

    pub const OPCODE: Field = Field::new(0, 1);
    pub const OP_ID: Field = Field::new(2, 2);
    pub const NAMESPACE: Field = Field::new(4, 4);
    pub const PRP1: Field = Field::new(24, 8);
    pub const PRP2: Field = Field::new(32, 8);
    pub const SLBA: Field = Field::new(40, 8);
    pub const NLB: Field = Field::new(48, 2);

    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub kind: OpKind,
    pub op_id: OpId,
    pub namespace: u32,
    pub prp1: u64,
    pub prp2: u64,
    pub slba: u64,
    /// One-based block count.
    pub blocks: u32,
}

impl DeviceCommand {
    pub fn encode(&self) -> Result<[u8; SQE_LEN], LayoutError> {
        if self.blocks == 0 || self.blocks > MAX_BLOCKS_PER_COMMAND {
            return Err(LayoutError::BlockCount(self.blocks));
        }
        let mut buf = [0u8; SQE_LEN];
        let opcode = match self.kind {
            OpKind::Read => sqe::READ,
            OpKind::Write => sqe::WRITE,
        };
        sqe::OPCODE.put(&mut buf, Endian::Little, opcode as u64);
        sqe::OP_ID.put(&mut buf, Endian::Little, self.op_id as u64);
        sqe::NAMESPACE.put(&mut buf, Endian::Little, self.namespace as u64);
        sqe::PRP1.put(&mut buf, Endian::Little, self.prp1);
        sqe::PRP2.put(&mut buf, Endian::Little, self.prp2);
        sqe::SLBA.put(&mut buf, Endian::Little, self.slba);
        sqe::NLB.put(&mut buf, Endian::Little, (self.blocks - 1) as u64);
        Ok(buf)
    }

    pub fn decode(buf: &[u8; SQE_LEN]) -> Result<Self, LayoutError> {
        let opcode = sqe::OPCODE.get(buf, Endian::Little) as u8;
        let kind = match opcode {
            sqe::READ => OpKind::Read,
            sqe::WRITE => OpKind::Write,
            other => return Err(LayoutError::UnknownOpcode(other)),
        };
        Ok(Self {
            kind,
            op_id: sqe::OP_ID.get(buf, Endian::Little) as OpId,
            namespace: sqe::NAMESPACE.get(buf, Endian::Little) as u32,
            prp1: sqe::PRP1.get(buf, Endian::Little),
            prp2: sqe::PRP2.get(buf, Endian::Little),
            slba: sqe::SLBA.get(buf, Endian::Little),
            blocks: sqe::NLB.get(buf, Endian::Little) as u32 + 1,
        })
    }

    /// Bytes moved by this command.
    pub fn transfer_bytes(&self, sector_size: u32) -> u64 {
        self.blocks as u64 * sector_size as u64
    }
}
