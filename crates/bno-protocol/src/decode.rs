use crate::cursor::ByteCursor;
use crate::validate::validate_packet;
use crate::{DecodeError, Error, RegisterMap, Result};
use serde::{Deserialize, Serialize};

/// Offset of the echoed register address in a register response.
pub const REG_ADDR_INDEX: usize = 7;
/// Offset of the register value in a register response.
pub const REG_VALUE_INDEX: usize = 11;

const BOARD_INFO_PAYLOAD_START: usize = 5;
const BURST_PAYLOAD_START: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub shuttle_id: u16,
    pub hardware_id: u16,
    pub software_id: u16,
    pub board_type: u8,
}

/// Result of checking a register-write echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Confirmed,
    Mismatch { echoed_address: u8, echoed_value: u8 },
}

impl WriteOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WriteOutcome::Confirmed)
    }
}

/// One logical field of a burst read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub name: String,
    pub address: u8,
    pub value: i32,
}

// Payload between the fixed header and the stop bytes; empty if the frame is too short.
fn payload(buf: &[u8], start: usize) -> &[u8] {
    let end = buf.len().saturating_sub(2);
    buf.get(start..end).unwrap_or(&[])
}

fn byte_at(buf: &[u8], index: usize) -> Result<u8> {
    buf.get(index).copied().ok_or_else(|| {
        DecodeError::Truncated {
            needed: index + 1,
            remaining: buf.len(),
        }
        .into()
    })
}

pub fn decode_board_info(buf: &[u8]) -> Result<BoardInfo> {
    validate_packet(buf)?;
    let mut cur = ByteCursor::new(payload(buf, BOARD_INFO_PAYLOAD_START));
    let _command_echo = cur.u8()?;
    Ok(BoardInfo {
        shuttle_id: cur.u16_be()?,
        hardware_id: cur.u16_be()?,
        software_id: cur.u16_be()?,
        board_type: cur.u8()?,
    })
}

pub fn decode_register_read(buf: &[u8]) -> Result<u8> {
    validate_packet(buf)?;
    byte_at(buf, REG_VALUE_INDEX)
}

/// A framing failure is an error; a wrong echo is reported as [`WriteOutcome::Mismatch`].
pub fn decode_register_write(buf: &[u8], address: u8, value: u8) -> Result<WriteOutcome> {
    validate_packet(buf)?;
    let echoed_address = byte_at(buf, REG_ADDR_INDEX)?;
    let echoed_value = byte_at(buf, REG_VALUE_INDEX)?;
    if echoed_address == address && echoed_value == value {
        Ok(WriteOutcome::Confirmed)
    } else {
        Ok(WriteOutcome::Mismatch {
            echoed_address,
            echoed_value,
        })
    }
}

/// Walk `num_bytes` of register space from `start_address`.
///
/// `_LSB` registers are read as signed little-endian 16-bit values together with their
/// `_MSB` partner; everything else is a single unsigned byte. When only one requested byte
/// is left at an `_LSB` register, that byte is read on its own.
pub fn decode_burst_read(
    buf: &[u8],
    map: &RegisterMap,
    start_address: u8,
    num_bytes: u16,
) -> Result<Vec<RegisterValue>> {
    validate_packet(buf)?;
    let mut cur = ByteCursor::new(payload(buf, BURST_PAYLOAD_START));
    let total = usize::from(num_bytes);
    let mut consumed = 0usize;
    let mut out = Vec::new();
    while consumed < total {
        let address = usize::from(start_address) + consumed;
        let (address, name) = u8::try_from(address)
            .ok()
            .and_then(|a| map.name(a).map(|n| (a, n)))
            .ok_or(Error::Decode(DecodeError::UnresolvedAddress { address }))?;
        let value = if name.contains("_LSB") && total - consumed >= 2 {
            consumed += 2;
            i32::from(cur.i16_le()?)
        } else {
            consumed += 1;
            i32::from(cur.u8()?)
        };
        out.push(RegisterValue {
            name: field_name(name).to_string(),
            address,
            value,
        });
    }
    Ok(out)
}

/// Strip the `_MSB_ADDR` / `_LSB_ADDR` / `_ADDR` suffix from a register name.
pub fn field_name(register: &str) -> &str {
    match register.strip_suffix("_ADDR") {
        Some(base) => base
            .strip_suffix("_LSB")
            .or_else(|| base.strip_suffix("_MSB"))
            .unwrap_or(base),
        None => register,
    }
}
