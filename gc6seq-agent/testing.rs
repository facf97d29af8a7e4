//! In-process doubles for the hardware collaborators, used by unit tests

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use gc6seq_raw::map::fsm::TRIGGER_BIT;
use gc6seq_raw::map::{addr, companion, FsmEvent, DEFAULT_EC_ADDRESS, CMD_DATA, CMD_INDEX};

use crate::common::bus::{BusError, BusOp, SmbusTransport};
use crate::common::pci::PciAddress;
use crate::companion::CompanionConfigPreserver;
use crate::error::{Gc6Error, Result};
use crate::link::{LinkPowerState, LinkTopology, LtrState, PortHandle};

const STATUS_ON: u8 = 0;
const STATUS_GC6: u8 = 1;
const STATUS_GC6M: u8 = 2;
const STATUS_D3COLD: u8 = 3;
const STATUS_RTD3_OFF: u8 = 4;

const MODE_GC6M: u8 = 1;
const MODE_D3COLD: u8 = 3;

const WAKE_TOGGLED: u8 = 0x80;

struct EcModel {
    regs: Vec<u8>,
    cursor: u16,
    fail_remaining: u32,
    trigger_delay: u32,
    pending_reads: u32,
    hold_power_status: bool,
    never_toggle: bool,
    events: Vec<u8>,
    data_writes: Vec<(u16, u8)>,
    transactions: u64,
    companion_words: HashMap<(u8, u8), u16>,
}

impl EcModel {
    fn new() -> Self {
        let mut regs = vec![0u8; 0x10000];
        regs[0..2].copy_from_slice(&0x10DEu16.to_le_bytes());
        regs[2..4].copy_from_slice(&0x2204u16.to_le_bytes());
        regs[4] = 1;
        regs[5] = 4;
        regs[6] = 23;
        regs[7] = 11;
        regs[8] = 7;
        regs[9] = 0x1F;
        let project = b"P3018-GC6";
        regs[0x10..0x10 + project.len()].copy_from_slice(project);

        let mut companion_words = HashMap::new();
        companion_words.insert(
            (companion::I2C_CHECK_TARGET, companion::I2C_CHECK_REGISTER),
            companion::I2C_CHECK_EXPECTED,
        );

        Self {
            regs,
            cursor: 0,
            fail_remaining: 0,
            trigger_delay: 0,
            pending_reads: 0,
            hold_power_status: false,
            never_toggle: false,
            events: Vec::new(),
            data_writes: Vec::new(),
            transactions: 0,
            companion_words,
        }
    }

    fn mode(&self) -> u8 {
        self.regs[addr::FSM_MODE as usize] & 0x07
    }

    fn power_status(&self) -> u8 {
        self.regs[addr::FSM_STATUS as usize] & 0x07
    }

    fn set_power_status(&mut self, status: u8) {
        let reg = &mut self.regs[addr::FSM_STATUS as usize];
        *reg = (*reg & !0x07) | status;
    }

    fn wake(&mut self, cause: u8) {
        if self.hold_power_status {
            return;
        }
        self.set_power_status(STATUS_ON);
        self.regs[addr::WAKE_STATUS as usize] = cause;
    }

    fn apply_event(&mut self, code: u8) {
        match code {
            c if c == FsmEvent::PreparePowerDown.code() => {
                let status = if self.mode() == MODE_GC6M { STATUS_GC6M } else { STATUS_GC6 };
                self.set_power_status(status);
                self.regs[addr::WAKE_STATUS as usize] = 0;
            }
            c if c == FsmEvent::PexResetAssert.code() => {
                let status = if self.mode() == MODE_D3COLD {
                    STATUS_D3COLD
                } else {
                    STATUS_RTD3_OFF
                };
                self.set_power_status(status);
                self.regs[addr::WAKE_STATUS as usize] = 0;
            }
            c if c == FsmEvent::PowerUpFull.code() => self.wake(1),
            c if c == FsmEvent::HpdAssert.code() => self.wake(3),
            c if c == FsmEvent::HpdDeassert.code() => self.wake(4),
            c if c == FsmEvent::HpdIrq.code() => self.wake(5),
            c if c == FsmEvent::PexResetDeassert.code() => {
                if self.regs[addr::WAKE_STATUS as usize] & 0x0F == 0 {
                    self.wake(8);
                } else if !self.hold_power_status {
                    // Keep the cause and toggle bit latched by the timer
                    self.set_power_status(STATUS_ON);
                }
            }
            _ => {}
        }
    }

    fn write_data(&mut self, value: u8) {
        let address = self.cursor;
        self.data_writes.push((address, value));
        match address {
            addr::FSM_MODE if value & TRIGGER_BIT != 0 => {
                // Commit applies immediately and the EC clears the trigger
                self.regs[address as usize] = value & 0x07;
            }
            addr::FSM_EVENT_CTRL if value & TRIGGER_BIT != 0 => {
                let code = value & !TRIGGER_BIT;
                self.regs[address as usize] = value;
                self.events.push(code);
                self.pending_reads = self.trigger_delay;
                self.apply_event(code);
            }
            _ => self.regs[address as usize] = value,
        }
        self.cursor = self.cursor.wrapping_add(1);
    }

    fn read_data(&mut self) -> u8 {
        let address = self.cursor;
        let mut value = self.regs[address as usize];
        if address == addr::FSM_EVENT_CTRL && value & TRIGGER_BIT != 0 {
            if self.pending_reads > 0 {
                self.pending_reads -= 1;
            } else {
                value &= !TRIGGER_BIT;
                self.regs[address as usize] = value;
            }
        }
        self.cursor = self.cursor.wrapping_add(1);
        value
    }

    fn transaction(&mut self, op: BusOp, target: u8, command: u8) -> std::result::Result<(), BusError> {
        self.transactions += 1;
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            return Err(BusError::new(op, target, command, "injected NACK"));
        }
        Ok(())
    }
}

/// Scripted EC simulator behind the `SmbusTransport` seam.
///
/// Clones share one register file so a test can inspect what the protocol
/// did after handing a clone to it.
#[derive(Clone)]
pub struct MockEc {
    model: Arc<Mutex<EcModel>>,
}

impl MockEc {
    /// Healthy EC: valid identity, firmware 1.4, every capability, GC6 mode,
    /// GPU powered on
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(EcModel::new())),
        }
    }

    /// Fail the next `count` transactions
    pub fn fail_next(&self, count: u32) {
        self.model.lock().fail_remaining = count;
    }

    /// Event register keeps its trigger bit for `reads` reads after a fire
    pub fn trigger_done_after(&self, reads: u32) {
        self.model.lock().trigger_delay = reads;
    }

    /// Power status no longer follows wake events
    pub fn hold_power_status(&self) {
        self.model.lock().hold_power_status = true;
    }

    /// The wake timer never toggles the wake status
    pub fn never_toggle(&self) {
        self.model.lock().never_toggle = true;
    }

    /// Expire the EC wake timer
    pub fn fire_timer(&self) {
        let mut model = self.model.lock();
        match model.power_status() {
            STATUS_RTD3_OFF | STATUS_D3COLD if !model.never_toggle => {
                model.regs[addr::WAKE_STATUS as usize] = WAKE_TOGGLED | 7;
            }
            STATUS_GC6 | STATUS_GC6M => model.wake(2),
            _ => {}
        }
    }

    pub fn register(&self, address: u16) -> u8 {
        self.model.lock().regs[address as usize]
    }

    pub fn set_register(&self, address: u16, value: u8) {
        self.model.lock().regs[address as usize] = value;
    }

    pub fn set_capabilities(&self, caps: u8) {
        self.set_register(addr::IDENTITY_BASE + 9, caps);
    }

    pub fn set_companion_word(&self, target: u8, command: u8, value: u16) {
        self.model.lock().companion_words.insert((target, command), value);
    }

    /// Every bus transaction attempted, failed ones included
    pub fn transactions(&self) -> u64 {
        self.model.lock().transactions
    }

    /// Data-window writes that landed on `address`
    pub fn data_writes_to(&self, address: u16) -> usize {
        self.model
            .lock()
            .data_writes
            .iter()
            .filter(|(a, _)| *a == address)
            .count()
    }

    /// Codes of every triggered FSM event, in order
    pub fn events(&self) -> Vec<u8> {
        self.model.lock().events.clone()
    }
}

impl Default for MockEc {
    fn default() -> Self {
        Self::new()
    }
}

impl SmbusTransport for MockEc {
    fn write_byte(&mut self, target: u8, command: u8, value: u8) -> std::result::Result<(), BusError> {
        let mut model = self.model.lock();
        model.transaction(BusOp::WriteByte, target, command)?;
        match (target, command) {
            (DEFAULT_EC_ADDRESS, CMD_DATA) => {
                model.write_data(value);
                Ok(())
            }
            _ => Err(BusError::new(BusOp::WriteByte, target, command, "no such command")),
        }
    }

    fn write_word(&mut self, target: u8, command: u8, value: u16) -> std::result::Result<(), BusError> {
        let mut model = self.model.lock();
        model.transaction(BusOp::WriteWord, target, command)?;
        match (target, command) {
            (DEFAULT_EC_ADDRESS, CMD_INDEX) => {
                model.cursor = value;
                Ok(())
            }
            _ => Err(BusError::new(BusOp::WriteWord, target, command, "no such command")),
        }
    }

    fn read_byte(&mut self, target: u8, command: u8) -> std::result::Result<u8, BusError> {
        let mut model = self.model.lock();
        model.transaction(BusOp::ReadByte, target, command)?;
        match (target, command) {
            (DEFAULT_EC_ADDRESS, CMD_DATA) => Ok(model.read_data()),
            _ => Err(BusError::new(BusOp::ReadByte, target, command, "no such command")),
        }
    }

    fn read_word(&mut self, target: u8, command: u8) -> std::result::Result<u16, BusError> {
        let mut model = self.model.lock();
        model.transaction(BusOp::ReadWord, target, command)?;
        let word = model
            .companion_words
            .get(&(target, command))
            .copied()
            .ok_or_else(|| BusError::new(BusOp::ReadWord, target, command, "no ACK"))?;
        // Addressing the GPU-side sensor wakes a GPU sitting in GC6
        if target == companion::I2C_CHECK_TARGET
            && matches!(model.power_status(), STATUS_GC6 | STATUS_GC6M)
        {
            model.wake(6);
        }
        Ok(word)
    }
}

struct TopologyModel {
    link: LinkPowerState,
    stuck: bool,
    hidden: bool,
    ltr: LtrState,
    requests: Vec<LinkPowerState>,
    ltr_writes: Vec<LtrState>,
}

/// Upstream port double: link state follows requests unless stuck
#[derive(Clone)]
pub struct MockTopology {
    model: Arc<Mutex<TopologyModel>>,
}

impl MockTopology {
    pub const PORT: PciAddress = PciAddress {
        domain: 0,
        bus: 0,
        device: 1,
        function: 0,
    };

    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(TopologyModel {
                link: LinkPowerState::L0,
                stuck: false,
                hidden: false,
                ltr: LtrState { enabled: true },
                requests: Vec::new(),
                ltr_writes: Vec::new(),
            })),
        }
    }

    /// Link ignores every state request
    pub fn stuck(&self) {
        self.model.lock().stuck = true;
    }

    /// GPU never answers config reads, even with the link up
    pub fn hide_device(&self) {
        self.model.lock().hidden = true;
    }

    pub fn link(&self) -> LinkPowerState {
        self.model.lock().link
    }

    pub fn requests(&self) -> Vec<LinkPowerState> {
        self.model.lock().requests.clone()
    }

    pub fn ltr(&self) -> LtrState {
        self.model.lock().ltr
    }

    pub fn set_ltr(&self, ltr: LtrState) {
        self.model.lock().ltr = ltr;
    }

    pub fn ltr_writes(&self) -> Vec<LtrState> {
        self.model.lock().ltr_writes.clone()
    }
}

impl Default for MockTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTopology for MockTopology {
    fn upstream_port(&mut self, device: PciAddress) -> Result<PortHandle> {
        Ok(PortHandle {
            address: Self::PORT,
            index: u32::from(device.device),
        })
    }

    fn set_downstream_link_state(&mut self, port: &PortHandle, state: LinkPowerState) -> Result<()> {
        if port.address != Self::PORT {
            return Err(Gc6Error::Link(format!("unknown port {}", port.address)));
        }
        let mut model = self.model.lock();
        model.requests.push(state);
        if !model.stuck {
            model.link = state;
        }
        Ok(())
    }

    fn downstream_link_state(&mut self, _port: &PortHandle) -> Result<LinkPowerState> {
        Ok(self.model.lock().link)
    }

    fn downstream_ltr(&mut self, _port: &PortHandle) -> Result<LtrState> {
        Ok(self.model.lock().ltr)
    }

    fn set_downstream_ltr(&mut self, _port: &PortHandle, ltr: LtrState) -> Result<()> {
        let mut model = self.model.lock();
        model.ltr = ltr;
        model.ltr_writes.push(ltr);
        Ok(())
    }

    fn device_present(&mut self, _device: PciAddress) -> Result<bool> {
        let model = self.model.lock();
        Ok(model.link.is_up() && !model.hidden)
    }
}

#[derive(Default)]
struct CompanionLog {
    calls: Vec<&'static str>,
    fail: bool,
}

/// Companion preserver double recording `save`/`restore` calls
#[derive(Clone, Default)]
pub struct MockCompanions {
    log: Arc<Mutex<CompanionLog>>,
}

impl MockCompanions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.log.lock().fail = true;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().calls.clone()
    }

    fn record(&self, call: &'static str) -> Result<()> {
        let mut log = self.log.lock();
        log.calls.push(call);
        if log.fail {
            return Err(Gc6Error::Companion(format!("{call} rejected")));
        }
        Ok(())
    }
}

impl CompanionConfigPreserver for MockCompanions {
    fn save_all(&mut self) -> Result<()> {
        self.record("save")
    }

    fn restore_all(&mut self) -> Result<()> {
        self.record("restore")
    }
}
