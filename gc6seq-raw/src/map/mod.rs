//! EC register map
//!
//! The EC exposes a 16-bit register file through a two-command SMBus window:
//! a word write to [`CMD_INDEX`] selects the register cursor, and each byte
//! transfer on [`CMD_DATA`] reads or writes at the cursor and advances it.
//! All offsets below are fixed by the EC firmware and must not change.
//!
//! ## Blocks
//!
//! - **identity** - vendor/device ids, firmware version, build date,
//!   capability bits, project string
//! - **fsm** - mode, event control, power status, wake status, error code,
//!   wake timer
//! - **debug** - 16-byte raw power-sequencer debug block

pub mod debug;
pub mod fsm;
pub mod identity;

pub use debug::DebugSnapshot;
pub use fsm::{EcErrorCode, EcPowerStatus, FsmEvent, FsmMode, WakeCause};
pub use identity::{BuildDate, Capabilities, FirmwareInfo};

/// Default 7-bit SMBus address of the EC
pub const DEFAULT_EC_ADDRESS: u8 = 0x2A;

/// SMBus command selecting the register cursor (word write)
pub const CMD_INDEX: u8 = 0x00;

/// SMBus command transferring one byte at the cursor (auto-increments)
pub const CMD_DATA: u8 = 0x01;

/// Register addresses inside the EC register file
pub mod addr {
    /// Identity block base
    pub const IDENTITY_BASE: u16 = 0x0000;

    /// FSM mode register (mode field + commit trigger)
    pub const FSM_MODE: u16 = 0x0040;

    /// FSM event control register (event code + trigger/pending)
    pub const FSM_EVENT_CTRL: u16 = 0x0041;

    /// FSM status register (power status + busy bits)
    pub const FSM_STATUS: u16 = 0x0042;

    /// Wake status register (wake cause + wake toggled)
    pub const WAKE_STATUS: u16 = 0x0043;

    /// Last error code reported by the power sequencer
    pub const ERROR_CODE: u16 = 0x0044;

    /// Wake timer, low byte (little-endian u16 milliseconds)
    pub const WAKE_TIMER_LO: u16 = 0x0048;

    /// Wake timer, high byte
    pub const WAKE_TIMER_HI: u16 = 0x0049;

    /// Side-channel sensor read through the EC's I2C bypass
    pub const I2C_BYPASS_SENSOR: u16 = 0x0050;

    /// Debug block base
    pub const DEBUG_BASE: u16 = 0x0060;
}

/// Companion device probed by the I2C wakeup check
pub mod companion {
    /// 7-bit SMBus address of the GPU-side thermal sensor
    pub const I2C_CHECK_TARGET: u8 = 0x4C;

    /// Manufacturer id register of the sensor
    pub const I2C_CHECK_REGISTER: u8 = 0xFE;

    /// Manufacturer id the sensor must report
    pub const I2C_CHECK_EXPECTED: u16 = 0x0041;
}
