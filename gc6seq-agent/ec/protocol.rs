use std::thread;
use std::time::Duration;

use gc6seq_raw::map::debug::{DebugSnapshot, DEBUG_LEN};
use gc6seq_raw::map::fsm::{FsmEventControl, FsmModeControl, FsmStatus, WakeStatus};
use gc6seq_raw::map::identity::{Capabilities, FirmwareInfo, IDENTITY_LEN};
use gc6seq_raw::map::{addr, EcErrorCode, FsmEvent, FsmMode, CMD_DATA, CMD_INDEX};
use gc6seq_raw::{LayoutError, Register, RegisterLayout};

use crate::common::bus::{BusError, SmbusTransport};
use crate::common::poll::{poll_bounded, PollBudget};
use crate::error::{Gc6Error, Result};

/// Attempts per bus transaction before the error is surfaced.
///
/// Tuned against current EC firmware; other board generations may need a
/// different value.
pub const BUS_RETRY_ATTEMPTS: u32 = 10;

/// Pause between bus attempts
pub const BUS_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Trigger-done poll: 500 reads, 1 ms apart, the EC's worst-case response
pub const TRIGGER_POLL: PollBudget = PollBudget::new(500, 1);

/// Value carried by one transaction on the index/data window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    Byte(u8),
    Word(u16),
}

/// Typed access to the EC register file through its index/data window.
///
/// Every operation moves the EC's single auto-incrementing cursor, so one
/// `EcProtocol` must own the bus for the duration of a transition.
pub struct EcProtocol<B: SmbusTransport> {
    bus: B,
    target: u8,
    firmware: Option<FirmwareInfo>,
    fsm_mode: Option<FsmMode>,
}

impl<B: SmbusTransport> EcProtocol<B> {
    pub fn new(bus: B, target: u8) -> Self {
        Self {
            bus,
            target,
            firmware: None,
            fsm_mode: None,
        }
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn firmware(&self) -> Option<&FirmwareInfo> {
        self.firmware.as_ref()
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.firmware.as_ref().map(|fw| fw.capabilities)
    }

    /// Run one bus primitive with the retry discipline
    fn with_retry<T, F>(&mut self, mut op: F) -> std::result::Result<T, BusError>
    where
        F: FnMut(&mut B) -> std::result::Result<T, BusError>,
    {
        let mut attempt = 1;
        loop {
            match op(&mut self.bus) {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!("EC bus transaction recovered after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < BUS_RETRY_ATTEMPTS => {
                    tracing::debug!("EC bus attempt {}/{} failed: {}", attempt, BUS_RETRY_ATTEMPTS, e);
                    attempt += 1;
                    thread::sleep(BUS_RETRY_DELAY);
                }
                Err(e) => {
                    tracing::warn!("EC bus transaction failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Write one value to an SMBus command of the window
    pub fn write_window(&mut self, command: u8, value: RegisterValue) -> Result<()> {
        let target = self.target;
        match value {
            RegisterValue::Byte(v) => self.with_retry(|bus| bus.write_byte(target, command, v))?,
            RegisterValue::Word(v) => self.with_retry(|bus| bus.write_word(target, command, v))?,
        }
        Ok(())
    }

    /// Move the EC cursor to `address`
    pub fn select(&mut self, address: u16) -> Result<()> {
        self.write_window(CMD_INDEX, RegisterValue::Word(address))
    }

    /// Write one byte at `address`; the cursor ends at `address + 1`
    pub fn write_register(&mut self, address: u16, value: u8) -> Result<()> {
        self.select(address)?;
        self.write_window(CMD_DATA, RegisterValue::Byte(value))?;
        tracing::debug!("EC write: 0x{:04x} = 0x{:02x}", address, value);
        Ok(())
    }

    /// Read one byte at the currently selected cursor
    pub fn read_register(&mut self) -> Result<u8> {
        let target = self.target;
        Ok(self.with_retry(|bus| bus.read_byte(target, CMD_DATA))?)
    }

    pub fn read_register_at(&mut self, address: u16) -> Result<u8> {
        self.select(address)?;
        let value = self.read_register()?;
        tracing::trace!("EC read: 0x{:04x} = 0x{:02x}", address, value);
        Ok(value)
    }

    /// Select `address` once and read `buf.len()` bytes by auto-increment
    pub fn read_block(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        self.select(address)?;
        for byte in buf.iter_mut() {
            *byte = self.read_register()?;
        }
        Ok(())
    }

    pub fn write_layout<T: RegisterLayout>(&mut self, reg: &Register<T>) -> Result<()> {
        reg.validate().map_err(|e| {
            Gc6Error::SoftwareError(format!("Invalid value for EC register 0x{:04x}: {e}", reg.address))
        })?;
        self.write_register(reg.address, reg.to_reg_value())
    }

    pub fn read_layout<T: RegisterLayout>(&mut self, address: u16) -> Result<Register<T>> {
        let value = self.read_register_at(address)?;
        Ok(Register::new(address, T::from_reg_value(value)))
    }

    /// Word read from another device on the same bus, same retry discipline
    pub fn read_companion_word(&mut self, target: u8, command: u8) -> Result<u16> {
        Ok(self.with_retry(|bus| bus.read_word(target, command))?)
    }

    /// Read and validate the firmware identity block
    pub fn identify(&mut self) -> Result<FirmwareInfo> {
        let mut block = [0u8; IDENTITY_LEN];
        self.read_block(addr::IDENTITY_BASE, &mut block)?;

        let info = FirmwareInfo::decode(&block).map_err(|e| match e {
            LayoutError::VendorMismatch { found, .. } => Gc6Error::DeviceNotFound(format!(
                "EC at 0x{:02x} reports vendor 0x{found:04x}",
                self.target
            )),
            other => Gc6Error::Layout(other),
        })?;

        if !info.is_supported() {
            return Err(Gc6Error::UnsupportedFirmware {
                major: info.version.0,
                minor: info.version.1,
            });
        }

        tracing::info!(
            "EC firmware {}.{} ({}) project '{}' device 0x{:04x}",
            info.version.0,
            info.version.1,
            info.date,
            info.project,
            info.device_id
        );

        self.firmware = Some(info.clone());
        Ok(info)
    }

    pub fn current_fsm_mode(&mut self) -> Result<FsmMode> {
        let reg = self.read_layout::<FsmModeControl>(addr::FSM_MODE)?;
        let mode = reg.layout.mode()?;
        self.fsm_mode = Some(mode);
        Ok(mode)
    }

    /// Switch the EC FSM mode, committing through the trigger bit.
    ///
    /// No bus traffic at all when `mode` is the last mode seen on the EC;
    /// no write when a fresh read shows it already in effect.
    pub fn set_fsm_mode(&mut self, mode: FsmMode) -> Result<()> {
        if self.fsm_mode == Some(mode) {
            return Ok(());
        }

        if let Some(caps) = self.capabilities() {
            if !caps.supports(mode) {
                return Err(Gc6Error::SoftwareError(format!(
                    "EC firmware does not support {} mode",
                    mode.name()
                )));
            }
        }

        let mut reg = self.read_layout::<FsmModeControl>(addr::FSM_MODE)?;
        if !reg.layout.commit && reg.layout.mode() == Ok(mode) {
            self.fsm_mode = Some(mode);
            return Ok(());
        }

        reg.layout.mode = mode as u8;
        reg.layout.commit = true;
        self.write_layout(&reg)?;

        poll_bounded("FSM mode commit", TRIGGER_POLL, |_| {
            Ok(!self.read_layout::<FsmModeControl>(addr::FSM_MODE)?.layout.commit)
        })?;

        let committed = self.read_layout::<FsmModeControl>(addr::FSM_MODE)?.layout.mode()?;
        if committed != mode {
            self.fsm_mode = Some(committed);
            return Err(Gc6Error::SoftwareError(format!(
                "EC kept {} mode after request for {}",
                committed.name(),
                mode.name()
            )));
        }

        tracing::info!("EC FSM mode set to {}", mode.name());
        self.fsm_mode = Some(mode);
        Ok(())
    }

    /// Write an FSM event with the trigger bit set
    pub fn fire_event(&mut self, event: FsmEvent) -> Result<()> {
        tracing::debug!("Firing EC event {} (0x{:02x})", event.name(), event.code());
        let reg = Register::new(addr::FSM_EVENT_CTRL, FsmEventControl::trigger(event));
        self.write_layout(&reg)
    }

    /// One read of the event register: true once the trigger bit cleared
    pub fn trigger_done(&mut self) -> Result<bool> {
        Ok(self
            .read_layout::<FsmEventControl>(addr::FSM_EVENT_CTRL)?
            .layout
            .is_done())
    }

    pub fn wait_trigger_done(&mut self, what: &str) -> Result<Duration> {
        poll_bounded(what, TRIGGER_POLL, |_| self.trigger_done())
    }

    pub fn read_fsm_status(&mut self) -> Result<FsmStatus> {
        Ok(self.read_layout::<FsmStatus>(addr::FSM_STATUS)?.layout)
    }

    pub fn read_wake_status(&mut self) -> Result<WakeStatus> {
        Ok(self.read_layout::<WakeStatus>(addr::WAKE_STATUS)?.layout)
    }

    pub fn read_error_code(&mut self) -> Result<EcErrorCode> {
        Ok(EcErrorCode::from(self.read_register_at(addr::ERROR_CODE)?))
    }

    /// Program the EC wake timer and latch it
    pub fn arm_wake_timer(&mut self, timeout_ms: u16) -> Result<()> {
        let [lo, hi] = timeout_ms.to_le_bytes();
        self.write_register(addr::WAKE_TIMER_LO, lo)?;
        // Cursor already sits on the high byte
        self.write_window(CMD_DATA, RegisterValue::Byte(hi))?;
        self.fire_event(FsmEvent::ArmWakeTimer)?;
        self.wait_trigger_done("wake timer arm")?;
        tracing::info!("EC wake timer armed for {} ms", timeout_ms);
        Ok(())
    }

    pub fn read_debug_block(&mut self) -> Result<DebugSnapshot> {
        let mut block = [0u8; DEBUG_LEN];
        self.read_block(addr::DEBUG_BASE, &mut block)?;
        Ok(DebugSnapshot::decode(&block)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEc;
    use gc6seq_raw::map::DEFAULT_EC_ADDRESS;

    fn protocol(mock: &MockEc) -> EcProtocol<MockEc> {
        EcProtocol::new(mock.clone(), DEFAULT_EC_ADDRESS)
    }

    #[test]
    fn test_register_round_trip() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);

        for (address, value) in [(0x0100u16, 0x5Au8), (0x0101, 0xA5), (0x0200, 0x00), (0x0100, 0x33)] {
            ec.write_register(address, value).unwrap();
        }
        assert_eq!(ec.read_register_at(0x0100).unwrap(), 0x33);
        assert_eq!(ec.read_register_at(0x0101).unwrap(), 0xA5);
        assert_eq!(ec.read_register_at(0x0200).unwrap(), 0x00);
    }

    #[test]
    fn test_cursor_auto_increment() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        ec.write_register(0x0300, 0x11).unwrap();
        ec.write_window(CMD_DATA, RegisterValue::Byte(0x22)).unwrap();

        let mut buf = [0u8; 2];
        ec.read_block(0x0300, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22]);
    }

    #[test]
    fn test_nine_failures_then_success() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        mock.fail_next(BUS_RETRY_ATTEMPTS - 1);
        ec.write_register(0x0100, 0x42).unwrap();
        assert_eq!(mock.register(0x0100), 0x42);
    }

    #[test]
    fn test_ten_failures_surface_bus_error() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        mock.fail_next(BUS_RETRY_ATTEMPTS);
        let err = ec.write_register(0x0100, 0x42).unwrap_err();
        assert!(matches!(err, Gc6Error::Bus(_)));
        assert_eq!(mock.register(0x0100), 0x00);
    }

    #[test]
    fn test_read_retry_ceiling() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        ec.select(0x0000).unwrap();
        mock.fail_next(BUS_RETRY_ATTEMPTS);
        assert!(matches!(ec.read_register(), Err(Gc6Error::Bus(_))));
    }

    #[test]
    fn test_identify() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        let info = ec.identify().unwrap();
        assert_eq!(info.vendor_id, 0x10DE);
        assert!(info.capabilities.gc6);
        assert_eq!(ec.capabilities(), Some(info.capabilities));
    }

    #[test]
    fn test_identify_wrong_vendor() {
        let mock = MockEc::new();
        mock.set_register(addr::IDENTITY_BASE, 0x86);
        mock.set_register(addr::IDENTITY_BASE + 1, 0x80);
        let mut ec = protocol(&mock);
        assert!(matches!(ec.identify(), Err(Gc6Error::DeviceNotFound(_))));
        assert!(ec.firmware().is_none());
    }

    #[test]
    fn test_identify_old_firmware() {
        let mock = MockEc::new();
        mock.set_register(addr::IDENTITY_BASE + 4, 1);
        mock.set_register(addr::IDENTITY_BASE + 5, 0);
        let mut ec = protocol(&mock);
        assert!(matches!(
            ec.identify(),
            Err(Gc6Error::UnsupportedFirmware { major: 1, minor: 0 })
        ));
    }

    #[test]
    fn test_set_fsm_mode_idempotent() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);

        ec.set_fsm_mode(FsmMode::Rtd3).unwrap();
        let after_first = mock.transactions();
        ec.set_fsm_mode(FsmMode::Rtd3).unwrap();

        assert_eq!(mock.transactions(), after_first);
        assert_eq!(mock.data_writes_to(addr::FSM_MODE), 1);
        assert_eq!(ec.current_fsm_mode().unwrap(), FsmMode::Rtd3);
    }

    #[test]
    fn test_set_fsm_mode_already_in_effect() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        // Mock powers up in GC6 mode
        ec.set_fsm_mode(FsmMode::Gc6).unwrap();
        assert_eq!(mock.data_writes_to(addr::FSM_MODE), 0);
    }

    #[test]
    fn test_set_fsm_mode_unsupported() {
        let mock = MockEc::new();
        mock.set_capabilities(0x01);
        let mut ec = protocol(&mock);
        ec.identify().unwrap();
        assert!(matches!(
            ec.set_fsm_mode(FsmMode::D3Cold),
            Err(Gc6Error::SoftwareError(_))
        ));
        assert_eq!(mock.data_writes_to(addr::FSM_MODE), 0);
    }

    #[test]
    fn test_arm_wake_timer() {
        let mock = MockEc::new();
        let mut ec = protocol(&mock);
        ec.arm_wake_timer(0x1234).unwrap();
        assert_eq!(mock.register(addr::WAKE_TIMER_LO), 0x34);
        assert_eq!(mock.register(addr::WAKE_TIMER_HI), 0x12);
        assert_eq!(mock.events(), vec![FsmEvent::ArmWakeTimer.code()]);
    }

    #[test]
    fn test_debug_block() {
        let mock = MockEc::new();
        mock.set_register(addr::DEBUG_BASE, 0x04);
        mock.set_register(addr::DEBUG_BASE + 1, 0xCD);
        mock.set_register(addr::DEBUG_BASE + 2, 0xAB);
        let mut ec = protocol(&mock);
        let snap = ec.read_debug_block().unwrap();
        assert_eq!(snap.fsm_index, 4);
        assert_eq!(snap.program_counter, 0xABCD);
    }
}
