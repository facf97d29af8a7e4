//! SMBus read/write primitives over Linux `i2c-dev`
//!
//! This module provides low-level SMBus access through `/dev/i2c-*`.
//! Retry policy and target bookkeeping live in the higher-level transport in
//! gc6seq-agent.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

pub type Result<T> = std::result::Result<T, SmbusError>;

/// `ioctl` request selecting the target address for subsequent transfers
const I2C_SLAVE: libc::c_ulong = 0x0703;
/// `ioctl` request performing one SMBus transfer
const I2C_SMBUS: libc::c_ulong = 0x0720;

const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_WRITE: u8 = 0;

const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_WORD_DATA: u32 = 3;

const I2C_SMBUS_BLOCK_MAX: usize = 32;

#[repr(C)]
union SmbusData {
    byte: u8,
    word: u16,
    // Sizes the union like the kernel's i2c_smbus_data
    #[allow(dead_code)]
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

/// Errors that can occur during SMBus operations
#[derive(Debug, thiserror::Error)]
pub enum SmbusError {
    #[error("Failed to open I2C bus {bus}: {source}")]
    OpenFailed { bus: u32, source: std::io::Error },

    #[error("Failed to select target 0x{target:02X}: {source}")]
    TargetFailed { target: u8, source: std::io::Error },

    #[error("SMBus read of command 0x{command:02X} failed: {source}")]
    ReadFailed {
        command: u8,
        source: std::io::Error,
    },

    #[error("SMBus write of command 0x{command:02X} failed: {source}")]
    WriteFailed {
        command: u8,
        source: std::io::Error,
    },
}

/// Open an I2C adapter character device
///
/// # Errors
///
/// Returns an error if the `i2c-dev` module is not loaded or the caller
/// lacks permission on `/dev/i2c-{bus}`.
pub fn open_bus(bus: u32) -> Result<File> {
    let path = format!("/dev/i2c-{bus}");
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| SmbusError::OpenFailed { bus, source: e })
}

/// Select the 7-bit target address used by subsequent transfers on `file`
pub fn set_target(file: &File, target: u8) -> Result<()> {
    // SAFETY: I2C_SLAVE takes the address by value.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(target),
        )
    };
    if rc < 0 {
        return Err(SmbusError::TargetFailed {
            target,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn transfer(file: &File, read_write: u8, command: u8, size: u32, data: &mut SmbusData) -> i32 {
    let mut args = SmbusIoctlData {
        read_write,
        command,
        size,
        data: data as *mut SmbusData,
    };
    // SAFETY: `args` and `data` outlive the call and match the kernel's
    // i2c_smbus_ioctl_data layout.
    unsafe { libc::ioctl(file.as_raw_fd(), I2C_SMBUS as _, &mut args) }
}

/// Read one byte from `command` on the selected target
pub fn read_byte_data(file: &File, command: u8) -> Result<u8> {
    let mut data = SmbusData { word: 0 };
    if transfer(file, I2C_SMBUS_READ, command, I2C_SMBUS_BYTE_DATA, &mut data) < 0 {
        return Err(SmbusError::ReadFailed {
            command,
            source: std::io::Error::last_os_error(),
        });
    }
    // SAFETY: the kernel filled the byte member for BYTE_DATA transfers.
    Ok(unsafe { data.byte })
}

/// Read one little-endian word from `command` on the selected target
pub fn read_word_data(file: &File, command: u8) -> Result<u16> {
    let mut data = SmbusData { word: 0 };
    if transfer(file, I2C_SMBUS_READ, command, I2C_SMBUS_WORD_DATA, &mut data) < 0 {
        return Err(SmbusError::ReadFailed {
            command,
            source: std::io::Error::last_os_error(),
        });
    }
    // SAFETY: the kernel filled the word member for WORD_DATA transfers.
    Ok(unsafe { data.word })
}

/// Write one byte to `command` on the selected target
pub fn write_byte_data(file: &File, command: u8, value: u8) -> Result<()> {
    let mut data = SmbusData { word: 0 };
    data.byte = value;
    if transfer(file, I2C_SMBUS_WRITE, command, I2C_SMBUS_BYTE_DATA, &mut data) < 0 {
        return Err(SmbusError::WriteFailed {
            command,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Write one little-endian word to `command` on the selected target
pub fn write_word_data(file: &File, command: u8, value: u16) -> Result<()> {
    let mut data = SmbusData { word: value };
    if transfer(file, I2C_SMBUS_WRITE, command, I2C_SMBUS_WORD_DATA, &mut data) < 0 {
        return Err(SmbusError::WriteFailed {
            command,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}
