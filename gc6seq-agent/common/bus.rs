use std::fmt;
use std::fs::File;

use gc6seq_raw::smbus;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    ReadByte,
    ReadWord,
    WriteByte,
    WriteWord,
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusOp::ReadByte => "read byte",
            BusOp::ReadWord => "read word",
            BusOp::WriteByte => "write byte",
            BusOp::WriteWord => "write word",
        })
    }
}

/// A failed transaction on the SMBus transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("SMBus {op} at 0x{target:02X} command 0x{command:02X} failed: {reason}")]
pub struct BusError {
    pub op: BusOp,
    pub target: u8,
    pub command: u8,
    pub reason: String,
}

impl BusError {
    pub fn new(op: BusOp, target: u8, command: u8, reason: impl ToString) -> Self {
        Self {
            op,
            target,
            command,
            reason: reason.to_string(),
        }
    }
}

/// Raw byte/word primitives addressed by a 7-bit target and a command byte.
///
/// Implementations may fail transiently; callers own the retry policy.
pub trait SmbusTransport {
    fn write_byte(&mut self, target: u8, command: u8, value: u8) -> std::result::Result<(), BusError>;

    fn write_word(&mut self, target: u8, command: u8, value: u16)
        -> std::result::Result<(), BusError>;

    fn read_byte(&mut self, target: u8, command: u8) -> std::result::Result<u8, BusError>;

    fn read_word(&mut self, target: u8, command: u8) -> std::result::Result<u16, BusError>;
}

/// SMBus transport over a Linux `/dev/i2c-N` adapter
pub struct I2cDevBus {
    file: File,
    bus: u32,
    selected: Option<u8>,
}

impl I2cDevBus {
    pub fn open(bus: u32) -> Result<Self> {
        let file = smbus::open_bus(bus)?;

        tracing::info!("Opened I2C adapter /dev/i2c-{}", bus);

        Ok(Self {
            file,
            bus,
            selected: None,
        })
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    fn select(&mut self, op: BusOp, target: u8, command: u8) -> std::result::Result<(), BusError> {
        if self.selected == Some(target) {
            return Ok(());
        }
        smbus::set_target(&self.file, target).map_err(|e| BusError::new(op, target, command, e))?;
        self.selected = Some(target);
        Ok(())
    }
}

impl SmbusTransport for I2cDevBus {
    fn write_byte(&mut self, target: u8, command: u8, value: u8) -> std::result::Result<(), BusError> {
        self.select(BusOp::WriteByte, target, command)?;
        tracing::trace!(
            "SMBus write: bus {} target 0x{:02x} cmd 0x{:02x} = 0x{:02x}",
            self.bus,
            target,
            command,
            value
        );
        smbus::write_byte_data(&self.file, command, value)
            .map_err(|e| BusError::new(BusOp::WriteByte, target, command, e))
    }

    fn write_word(
        &mut self,
        target: u8,
        command: u8,
        value: u16,
    ) -> std::result::Result<(), BusError> {
        self.select(BusOp::WriteWord, target, command)?;
        tracing::trace!(
            "SMBus write: bus {} target 0x{:02x} cmd 0x{:02x} = 0x{:04x}",
            self.bus,
            target,
            command,
            value
        );
        smbus::write_word_data(&self.file, command, value)
            .map_err(|e| BusError::new(BusOp::WriteWord, target, command, e))
    }

    fn read_byte(&mut self, target: u8, command: u8) -> std::result::Result<u8, BusError> {
        self.select(BusOp::ReadByte, target, command)?;
        smbus::read_byte_data(&self.file, command)
            .map_err(|e| BusError::new(BusOp::ReadByte, target, command, e))
    }

    fn read_word(&mut self, target: u8, command: u8) -> std::result::Result<u16, BusError> {
        self.select(BusOp::ReadWord, target, command)?;
        smbus::read_word_data(&self.file, command)
            .map_err(|e| BusError::new(BusOp::ReadWord, target, command, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        let err = BusError::new(BusOp::WriteWord, 0x2A, 0x00, "nack");
        assert_eq!(
            err.to_string(),
            "SMBus write word at 0x2A command 0x00 failed: nack"
        );
    }
}
