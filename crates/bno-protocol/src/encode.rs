use crate::{ConfigError, ConfigRegistry, DecodeError};

pub const REG_ADDR: &str = "reg_addr";
pub const REG_VAL: &str = "reg_val";
pub const START_REG_ADDR: &str = "start_reg_addr";
pub const NUM_BYTES_MSB: &str = "num_bytes_msb";
pub const NUM_BYTES_LSB: &str = "num_bytes_lsb";

/// A named byte position inside a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    pub description: String,
    pub offset: usize,
}

/// Command bytes as loaded from config. Never modified after construction; every
/// build works on its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    name: String,
    bytes: Vec<u8>,
    slots: Vec<ParamSlot>,
}

impl CommandTemplate {
    pub fn new(name: &str, bytes: Vec<u8>, slots: Vec<ParamSlot>) -> Result<Self, ConfigError> {
        if let Some(bad) = slots.iter().find(|s| s.offset >= bytes.len()) {
            return Err(ConfigError::SlotOutOfRange {
                command: name.to_string(),
                description: bad.description.clone(),
                offset: bad.offset,
                len: bytes.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            bytes,
            slots,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    pub fn slot(&self, description: &str) -> Option<&ParamSlot> {
        self.slots.iter().find(|s| s.description == description)
    }

    /// Copy the template and write each `(description, value)` override into its slot.
    /// Overrides apply in order, so a later one for the same slot wins.
    pub fn build(&self, overrides: &[(&str, u8)]) -> Result<Vec<u8>, DecodeError> {
        let mut out = self.bytes.clone();
        for &(description, value) in overrides {
            let slot = self
                .slot(description)
                .ok_or_else(|| DecodeError::UnknownParameter {
                    template: self.name.clone(),
                    description: description.to_string(),
                })?;
            // Offsets were bounds-checked in `new`.
            out[slot.offset] = value;
        }
        Ok(out)
    }
}

pub fn board_info_command(reg: &ConfigRegistry) -> Result<Vec<u8>, DecodeError> {
    reg.board_information().build(&[])
}

pub fn read_register_command(reg: &ConfigRegistry, address: u8) -> Result<Vec<u8>, DecodeError> {
    reg.read_register().build(&[(REG_ADDR, address)])
}

pub fn write_register_command(
    reg: &ConfigRegistry,
    address: u8,
    value: u8,
) -> Result<Vec<u8>, DecodeError> {
    reg.write_register()
        .build(&[(REG_ADDR, address), (REG_VAL, value)])
}

/// The byte count travels big-endian across two one-byte slots.
pub fn burst_read_command(
    reg: &ConfigRegistry,
    start_address: u8,
    num_bytes: u16,
) -> Result<Vec<u8>, DecodeError> {
    let [msb, lsb] = num_bytes.to_be_bytes();
    reg.burst_read().build(&[
        (START_REG_ADDR, start_address),
        (NUM_BYTES_MSB, msb),
        (NUM_BYTES_LSB, lsb),
    ])
}
