//! Text command traces.
//!
//! One command per line: `opcode address length data`.  Opcode (0 read, 1 write), address and
//! length are decimal; the data pattern is hexadecimal with an optional `0x`.  Blank lines and
//! lines starting with `#` are skipped.  Any other malformed line fails the whole trace.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::TraceError;
use crate::pipeline::types::{Command, OpKind};

fn parse_line(line: &str) -> Result<Command, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [opcode, address, length, data] = fields[..] else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };
    let opcode: u64 = opcode
        .parse()
        .map_err(|_| format!("bad opcode {opcode:?}"))?;
    let kind = OpKind::from_opcode(opcode).ok_or_else(|| format!("unknown opcode {opcode}"))?;
    let address: u64 = address
        .parse()
        .map_err(|_| format!("bad address {address:?}"))?;
    let length: u32 = length
        .parse()
        .map_err(|_| format!("bad length {length:?}"))?;
    let digits = data
        .strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))
        .unwrap_or(data);
    let pattern =
        u64::from_str_radix(digits, 16).map_err(|_| format!("bad data pattern {data:?}"))?;
    Ok(Command::new(kind, address, length, pattern))
}

pub fn parse_trace(text: &str) -> Result<Vec<Command>, TraceError> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| parse_line(text).map_err(|reason| TraceError::Parse { line, reason }))
        .collect()
}

pub fn load_trace(path: &Path) -> Result<Vec<Command>, TraceError> {
    let text = fs::read_to_string(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let commands = parse_trace(&text)?;
    info!("read {} commands from {}", commands.len(), path.display());
    Ok(commands)
}
