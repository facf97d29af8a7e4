use gc6seq_raw::map::{addr, companion, FsmEvent};

use crate::common::bus::SmbusTransport;
use crate::ec::EcProtocol;
use crate::error::Result;
use crate::sequencer::TransitionStyle;
use crate::{named_enum, serde_by_name};

named_enum! {
    /// Stimulus used to bring the GPU back out of a low-power state
    pub enum WakeupEventKind {
        GpuEvent => "gpu-event",
        I2CBypass => "i2c-bypass",
        I2CCheck => "i2c-check",
        Timer => "timer",
        HotPlug => "hotplug",
        HotUnplug => "hotunplug",
        HotPlugIrq => "hotplug-irq",
        Rtd3GpuTimer => "rtd3-gpu-timer",
        Rtd3Cpu => "rtd3-cpu",
    }
}

serde_by_name!(WakeupEventKind);

impl Default for WakeupEventKind {
    fn default() -> Self {
        WakeupEventKind::GpuEvent
    }
}

impl WakeupEventKind {
    /// Whether this wakeup can end a transition of `style`
    pub fn supports(&self, style: TransitionStyle) -> bool {
        match self {
            WakeupEventKind::Timer => true,
            WakeupEventKind::Rtd3GpuTimer | WakeupEventKind::Rtd3Cpu => style == TransitionStyle::Rtd3,
            WakeupEventKind::GpuEvent
            | WakeupEventKind::I2CBypass
            | WakeupEventKind::I2CCheck
            | WakeupEventKind::HotPlug
            | WakeupEventKind::HotUnplug
            | WakeupEventKind::HotPlugIrq => style == TransitionStyle::Gc6,
        }
    }

    /// Whether entry must program the EC wake timer
    pub fn arms_timer(&self) -> bool {
        matches!(self, WakeupEventKind::Timer | WakeupEventKind::Rtd3GpuTimer)
    }
}

/// Non-fatal verification results of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeupOutcome {
    pub i2c_bypass_mismatch: bool,
    pub i2c_check_mismatch: bool,
}

/// Deliver the configured wakeup stimulus to the EC
pub fn dispatch<B: SmbusTransport>(ec: &mut EcProtocol<B>, kind: WakeupEventKind) -> Result<WakeupOutcome> {
    let mut outcome = WakeupOutcome::default();
    tracing::debug!("Dispatching wakeup {}", kind);

    match kind {
        WakeupEventKind::GpuEvent => power_up_full(ec)?,
        WakeupEventKind::I2CBypass => {
            let value = ec.read_register_at(addr::I2C_BYPASS_SENSOR)?;
            if value != 0 {
                tracing::warn!("I2C bypass sensor reads 0x{:02x}, expected 0x00", value);
                outcome.i2c_bypass_mismatch = true;
            }
            power_up_full(ec)?;
        }
        WakeupEventKind::I2CCheck => {
            // The transaction toward the GPU-side sensor is the wake stimulus
            let word = ec.read_companion_word(companion::I2C_CHECK_TARGET, companion::I2C_CHECK_REGISTER)?;
            if word != companion::I2C_CHECK_EXPECTED {
                tracing::warn!(
                    "I2C check read 0x{:04x} from 0x{:02x}, expected 0x{:04x}",
                    word,
                    companion::I2C_CHECK_TARGET,
                    companion::I2C_CHECK_EXPECTED
                );
                outcome.i2c_check_mismatch = true;
            }
        }
        WakeupEventKind::HotPlug => ec.fire_event(FsmEvent::HpdAssert)?,
        WakeupEventKind::HotUnplug => ec.fire_event(FsmEvent::HpdDeassert)?,
        WakeupEventKind::HotPlugIrq => ec.fire_event(FsmEvent::HpdIrq)?,
        WakeupEventKind::Timer | WakeupEventKind::Rtd3GpuTimer | WakeupEventKind::Rtd3Cpu => {}
    }

    Ok(outcome)
}

fn power_up_full<B: SmbusTransport>(ec: &mut EcProtocol<B>) -> Result<()> {
    ec.fire_event(FsmEvent::PowerUpFull)?;
    ec.wait_trigger_done("POWER_UP_FULL acknowledge")?;
    Ok(())
}
