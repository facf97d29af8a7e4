//! Power-sequencer FSM registers
//!
//! The EC runs a master state machine that drives the GPU power rails and
//! the PEX reset line. The host steers it through an event register and
//! observes it through status registers.

use crate::register::{LayoutError, RegisterLayout};

/// Bit 7 of the mode and event registers: host sets it to trigger, the EC
/// clears it once the request is done.
pub const TRIGGER_BIT: u8 = 0x80;

/// Mask of the 7-bit event code
pub const EVENT_CODE_MASK: u8 = 0x7F;

/// Mask of the 3-bit mode field
pub const MODE_MASK: u8 = 0x07;

/// Mask of the 3-bit power-status field
pub const POWER_STATUS_MASK: u8 = 0x07;

/// Mask of the 4-bit wake-cause field
pub const WAKE_CAUSE_MASK: u8 = 0x0F;

/// FSM mode selecting which deep power state the EC sequences into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FsmMode {
    Gc6 = 0,
    Gc6M = 1,
    Rtd3 = 2,
    D3Cold = 3,
}

impl FsmMode {
    pub fn name(&self) -> &'static str {
        match self {
            FsmMode::Gc6 => "GC6",
            FsmMode::Gc6M => "GC6M",
            FsmMode::Rtd3 => "RTD3",
            FsmMode::D3Cold => "D3Cold",
        }
    }
}

impl TryFrom<u8> for FsmMode {
    type Error = LayoutError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FsmMode::Gc6),
            1 => Ok(FsmMode::Gc6M),
            2 => Ok(FsmMode::Rtd3),
            3 => Ok(FsmMode::D3Cold),
            _ => Err(LayoutError::InvalidField {
                field: "FSM mode",
                value,
            }),
        }
    }
}

/// Event codes accepted by the FSM event control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FsmEvent {
    /// Enter GC6/GC6M: cut GPU rails after self-refresh handshake
    PreparePowerDown = 0x01,
    /// Bring the GPU back to full power
    PowerUpFull = 0x02,
    /// Assert hotplug detect (T1)
    HpdAssert = 0x03,
    /// De-assert hotplug detect (T2)
    HpdDeassert = 0x04,
    /// Pulse hotplug detect as an IRQ
    HpdIrq = 0x05,
    /// Assert PEX reset (RTD3 entry)
    PexResetAssert = 0x08,
    /// De-assert PEX reset (RTD3 exit)
    PexResetDeassert = 0x09,
    /// Latch the wake timer registers
    ArmWakeTimer = 0x0A,
}

impl FsmEvent {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            FsmEvent::PreparePowerDown => "PreparePowerDown",
            FsmEvent::PowerUpFull => "PowerUpFull",
            FsmEvent::HpdAssert => "HpdAssert",
            FsmEvent::HpdDeassert => "HpdDeassert",
            FsmEvent::HpdIrq => "HpdIrq",
            FsmEvent::PexResetAssert => "PexResetAssert",
            FsmEvent::PexResetDeassert => "PexResetDeassert",
            FsmEvent::ArmWakeTimer => "ArmWakeTimer",
        }
    }
}

/// FSM Mode Register layout
///
/// | Bits | Field  | Description                         |
/// |------|--------|-------------------------------------|
/// | 0-2  | mode   | Requested/committed [`FsmMode`]      |
/// | 3-6  | -      | Reserved                            |
/// | 7    | commit | Host sets to commit, EC clears      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsmModeControl {
    pub mode: u8,
    pub commit: bool,
}

impl FsmModeControl {
    pub fn commit(mode: FsmMode) -> Self {
        Self {
            mode: mode as u8,
            commit: true,
        }
    }

    pub fn mode(&self) -> Result<FsmMode, LayoutError> {
        FsmMode::try_from(self.mode)
    }
}

impl RegisterLayout for FsmModeControl {
    fn to_reg_value(&self) -> u8 {
        (self.mode & MODE_MASK) | if self.commit { TRIGGER_BIT } else { 0 }
    }

    fn from_reg_value(value: u8) -> Self {
        Self {
            mode: value & MODE_MASK,
            commit: value & TRIGGER_BIT != 0,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.mode > MODE_MASK {
            return Err("FSM mode must be <= 7 (3 bits)");
        }
        Ok(())
    }
}

/// FSM Event Control Register layout
///
/// | Bits | Field   | Description                                   |
/// |------|---------|-----------------------------------------------|
/// | 0-6  | event   | [`FsmEvent`] code                             |
/// | 7    | trigger | Host sets to fire; reads 1 while pending, 0 when done |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsmEventControl {
    pub event: u8,
    pub trigger: bool,
}

impl FsmEventControl {
    pub fn trigger(event: FsmEvent) -> Self {
        Self {
            event: event.code(),
            trigger: true,
        }
    }

    /// True once the EC has consumed the last triggered event
    pub fn is_done(&self) -> bool {
        !self.trigger
    }
}

impl RegisterLayout for FsmEventControl {
    fn to_reg_value(&self) -> u8 {
        (self.event & EVENT_CODE_MASK) | if self.trigger { TRIGGER_BIT } else { 0 }
    }

    fn from_reg_value(value: u8) -> Self {
        Self {
            event: value & EVENT_CODE_MASK,
            trigger: value & TRIGGER_BIT != 0,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.event > EVENT_CODE_MASK {
            return Err("Event code must be <= 0x7F (7 bits)");
        }
        Ok(())
    }
}

/// Power status reported in bits 0-2 of the FSM status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EcPowerStatus {
    PoweredOn = 0,
    Gc6 = 1,
    Gc6M = 2,
    D3Cold = 3,
    Rtd3Off = 4,
    Transitioning = 5,
}

impl TryFrom<u8> for EcPowerStatus {
    type Error = LayoutError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EcPowerStatus::PoweredOn),
            1 => Ok(EcPowerStatus::Gc6),
            2 => Ok(EcPowerStatus::Gc6M),
            3 => Ok(EcPowerStatus::D3Cold),
            4 => Ok(EcPowerStatus::Rtd3Off),
            5 => Ok(EcPowerStatus::Transitioning),
            _ => Err(LayoutError::InvalidField {
                field: "power status",
                value,
            }),
        }
    }
}

/// FSM Status Register layout
///
/// | Bits | Field          | Description                      |
/// |------|----------------|----------------------------------|
/// | 0-2  | power_status   | [`EcPowerStatus`]                |
/// | 3    | sequencer_busy | Power-rail sequencer running     |
/// | 4    | master_busy    | Master FSM processing an event   |
/// | 5-7  | -              | Reserved                         |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsmStatus {
    pub power_status: u8,
    pub sequencer_busy: bool,
    pub master_busy: bool,
}

impl FsmStatus {
    pub fn power_status(&self) -> Result<EcPowerStatus, LayoutError> {
        EcPowerStatus::try_from(self.power_status)
    }

    /// Device fully powered with both state machines idle
    pub fn is_powered_on(&self) -> bool {
        self.power_status == EcPowerStatus::PoweredOn as u8
            && !self.sequencer_busy
            && !self.master_busy
    }
}

impl RegisterLayout for FsmStatus {
    fn to_reg_value(&self) -> u8 {
        (self.power_status & POWER_STATUS_MASK)
            | if self.sequencer_busy { 0x08 } else { 0 }
            | if self.master_busy { 0x10 } else { 0 }
    }

    fn from_reg_value(value: u8) -> Self {
        Self {
            power_status: value & POWER_STATUS_MASK,
            sequencer_busy: value & 0x08 != 0,
            master_busy: value & 0x10 != 0,
        }
    }
}

/// Wake cause reported in bits 0-3 of the wake status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeCause {
    None,
    GpuEvent,
    Timer,
    HotPlug,
    HotUnplug,
    HotPlugIrq,
    I2c,
    Rtd3GpuTimer,
    PexReset,
    Unknown(u8),
}

impl From<u8> for WakeCause {
    fn from(value: u8) -> Self {
        match value & WAKE_CAUSE_MASK {
            0 => WakeCause::None,
            1 => WakeCause::GpuEvent,
            2 => WakeCause::Timer,
            3 => WakeCause::HotPlug,
            4 => WakeCause::HotUnplug,
            5 => WakeCause::HotPlugIrq,
            6 => WakeCause::I2c,
            7 => WakeCause::Rtd3GpuTimer,
            8 => WakeCause::PexReset,
            other => WakeCause::Unknown(other),
        }
    }
}

/// Wake Status Register layout
///
/// | Bits | Field   | Description                                    |
/// |------|---------|------------------------------------------------|
/// | 0-3  | cause   | [`WakeCause`] of the last exit                 |
/// | 4-6  | -       | Reserved                                       |
/// | 7    | toggled | GPU-side RTD3 wake timer has toggled the wake line |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeStatus {
    pub cause: u8,
    pub toggled: bool,
}

impl WakeStatus {
    pub fn cause(&self) -> WakeCause {
        WakeCause::from(self.cause)
    }
}

impl RegisterLayout for WakeStatus {
    fn to_reg_value(&self) -> u8 {
        (self.cause & WAKE_CAUSE_MASK) | if self.toggled { TRIGGER_BIT } else { 0 }
    }

    fn from_reg_value(value: u8) -> Self {
        Self {
            cause: value & WAKE_CAUSE_MASK,
            toggled: value & TRIGGER_BIT != 0,
        }
    }
}

/// Error code register values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcErrorCode {
    None,
    TriggerTimeout,
    RailFault,
    LinkFault,
    InvalidEvent,
    InvalidMode,
    Other(u8),
}

impl From<u8> for EcErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0 => EcErrorCode::None,
            1 => EcErrorCode::TriggerTimeout,
            2 => EcErrorCode::RailFault,
            3 => EcErrorCode::LinkFault,
            4 => EcErrorCode::InvalidEvent,
            5 => EcErrorCode::InvalidMode,
            other => EcErrorCode::Other(other),
        }
    }
}
