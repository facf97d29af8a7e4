//! GPU power-state transition sequencer
//!
//! Drives GC6-style (EC-managed self refresh, link disabled) and RTD3-style
//! (link in L2, fundamental reset asserted) entry and exit against one EC.
//! Every hardware-visible step ends in a bounded poll; an exhausted poll or
//! a bus failure aborts the sequence through [`FatalGuard`], which captures
//! the EC debug state before the error reaches the caller.

mod gc6;
mod guard;
mod rtd3;
pub mod stats;

pub use guard::FatalGuard;
pub use stats::CycleStatistics;

use std::thread;
use std::time::{Duration, Instant};

use gc6seq_raw::map::identity::FirmwareInfo;
use gc6seq_raw::map::{EcPowerStatus, FsmMode};
use gc6seq_raw::RegisterLayout;

use crate::common::bus::SmbusTransport;
use crate::common::poll::{as_millis, as_millis_ceil, poll_bounded, PollBudget};
use crate::companion::CompanionConfigPreserver;
use crate::config::{LinkSequencing, ProtocolOptions};
use crate::ec::{EcProtocol, TRIGGER_POLL};
use crate::error::{Gc6Error, Result};
use crate::link::{LinkPowerController, LinkPowerState, LinkTopology};
use crate::wakeup::{self, WakeupEventKind, WakeupOutcome};
use crate::{enum_with_data, named_enum, serde_by_name};

/// EC power-status poll after a wake or power-down command
pub const STATUS_POLL: PollBudget = PollBudget::new(500, 1);

/// Wake-toggled poll for GPU-timer RTD3 exits
pub const WAKE_TOGGLE_POLL: PollBudget = PollBudget::new(500, 2);

/// Every Nth poll is logged when verbosity is 2 or more
const POLL_LOG_INTERVAL: u32 = 50;

named_enum! {
    /// Host-side view of the GPU power state
    pub enum PowerState {
        FullPower => "full-power",
        Transitioning => "transitioning",
        Gc6 => "gc6",
        Gc6M => "gc6m",
        D3Cold => "d3cold",
        Rtd3Off => "rtd3-off",
    }
}

serde_by_name!(PowerState);

impl PowerState {
    /// Sequence family that leaves this state, if it is a low-power state
    pub fn style(&self) -> Option<TransitionStyle> {
        match self {
            PowerState::Gc6 | PowerState::Gc6M => Some(TransitionStyle::Gc6),
            PowerState::D3Cold | PowerState::Rtd3Off => Some(TransitionStyle::Rtd3),
            PowerState::FullPower | PowerState::Transitioning => None,
        }
    }
}

impl From<EcPowerStatus> for PowerState {
    fn from(status: EcPowerStatus) -> Self {
        match status {
            EcPowerStatus::PoweredOn => PowerState::FullPower,
            EcPowerStatus::Gc6 => PowerState::Gc6,
            EcPowerStatus::Gc6M => PowerState::Gc6M,
            EcPowerStatus::D3Cold => PowerState::D3Cold,
            EcPowerStatus::Rtd3Off => PowerState::Rtd3Off,
            EcPowerStatus::Transitioning => PowerState::Transitioning,
        }
    }
}

/// Family of entry/exit sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionStyle {
    /// EC-managed; link disabled around the EC command
    Gc6,
    /// Host-managed; link in L2 and PERST# asserted
    Rtd3,
}

enum_with_data! {
    /// Low-power state requested from `enter`
    pub enum TargetState: FsmMode {
        Gc6 => ("gc6", FsmMode::Gc6),
        Gc6M => ("gc6m", FsmMode::Gc6M),
        Rtd3 => ("rtd3", FsmMode::Rtd3),
        D3Cold => ("d3cold", FsmMode::D3Cold),
    }
    impl fsm_mode -> FsmMode
}

serde_by_name!(TargetState);

impl TargetState {
    pub fn style(&self) -> TransitionStyle {
        match self {
            TargetState::Gc6 | TargetState::Gc6M => TransitionStyle::Gc6,
            TargetState::Rtd3 | TargetState::D3Cold => TransitionStyle::Rtd3,
        }
    }

    /// Power state recorded once entry completes
    pub fn reached_state(&self) -> PowerState {
        match self {
            TargetState::Gc6 => PowerState::Gc6,
            TargetState::Gc6M => PowerState::Gc6M,
            TargetState::Rtd3 => PowerState::Rtd3Off,
            TargetState::D3Cold => PowerState::D3Cold,
        }
    }
}

named_enum! {
    /// Outcome of one entry or exit
    pub enum ResultCode {
        NotRun => "not-run",
        Success => "success",
        Timeout => "timeout",
        BusError => "bus-error",
        DeviceNotFound => "device-not-found",
        UnsupportedFirmware => "unsupported-firmware",
        SoftwareError => "software-error",
        LinkError => "link-error",
        CompanionError => "companion-error",
    }
}

serde_by_name!(ResultCode);

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::NotRun
    }
}

named_enum! {
    pub enum Phase {
        Entry => "entry",
        Exit => "exit",
    }
}

/// Sequences one GPU through its low-power states.
///
/// Holds the EC, the link controller and the companion preserver for the
/// lifetime of the device; `&mut self` on every operation keeps a single
/// transition in flight.
pub struct PowerSequencer<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    ec: EcProtocol<B>,
    link: LinkPowerController<L>,
    companions: C,
    options: ProtocolOptions,
    state: PowerState,
    stats: CycleStatistics,
    poll_count: u32,
    /// How the last GC6 entry took the link down, until an exit brings it back
    link_taken_down: Option<LinkSequencing>,
}

impl<B, L, C> PowerSequencer<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    pub fn new(
        ec: EcProtocol<B>,
        mut link: LinkPowerController<L>,
        companions: C,
        options: ProtocolOptions,
    ) -> Result<Self> {
        options.validate()?;
        link.set_poll_timeout_ms(options.link_poll_timeout_ms);
        Ok(Self {
            ec,
            link,
            companions,
            options,
            state: PowerState::FullPower,
            stats: CycleStatistics::default(),
            poll_count: 0,
            link_taken_down: None,
        })
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn stats(&self) -> &CycleStatistics {
        &self.stats
    }

    pub fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    pub fn firmware(&self) -> Option<&FirmwareInfo> {
        self.ec.firmware()
    }

    pub fn ec(&mut self) -> &mut EcProtocol<B> {
        &mut self.ec
    }

    pub fn link(&self) -> &LinkPowerController<L> {
        &self.link
    }

    /// Replace the options used by the next `enter`/`exit`
    pub fn set_options(&mut self, options: ProtocolOptions) -> Result<()> {
        options.validate()?;
        self.link.set_poll_timeout_ms(options.link_poll_timeout_ms);
        self.options = options;
        Ok(())
    }

    pub fn identify(&mut self) -> Result<FirmwareInfo> {
        self.ec.identify()
    }

    /// Take the GPU from full power into `target`
    pub fn enter(&mut self, target: TargetState) -> Result<()> {
        self.stats = CycleStatistics::default();
        self.poll_count = 0;

        if let Err(e) = self.validate_entry(target) {
            self.stats.entry_result = e.result_code();
            return Err(e);
        }

        tracing::info!("Entering {} (wakeup {})", target, self.options.wakeup);
        self.state = PowerState::Transitioning;

        let outcome = {
            let mut guard = FatalGuard::arm(self, Phase::Entry);
            let result = match target.style() {
                TransitionStyle::Gc6 => guard.enter_gc6(target),
                TransitionStyle::Rtd3 => guard.enter_rtd3(target),
            };
            match &result {
                Ok(()) => guard.disarm(),
                Err(e) => guard.record(e),
            }
            result
        };
        outcome?;

        self.state = target.reached_state();
        self.stats.entry_result = ResultCode::Success;
        tracing::info!(
            "GPU in {} after {} ms (status 0x{:02x})",
            self.state,
            self.stats.entry_time_ms,
            self.stats.entry_status
        );
        Ok(())
    }

    /// Bring the GPU back to full power from the state `enter` reached
    pub fn exit(&mut self) -> Result<()> {
        self.stats.reset_exit();
        self.poll_count = 0;

        let style = match self.validate_exit() {
            Ok(style) => style,
            Err(e) => {
                self.stats.exit_result = e.result_code();
                return Err(e);
            }
        };

        tracing::info!("Exiting {} (wakeup {})", self.state, self.options.wakeup);
        self.state = PowerState::Transitioning;

        let outcome = {
            let mut guard = FatalGuard::arm(self, Phase::Exit);
            let result = match style {
                TransitionStyle::Gc6 => guard.exit_gc6(),
                TransitionStyle::Rtd3 => guard.exit_rtd3(),
            };
            match &result {
                Ok(()) => guard.disarm(),
                Err(e) => guard.record(e),
            }
            result
        };
        outcome?;

        self.state = PowerState::FullPower;
        self.stats.exit_result = ResultCode::Success;
        tracing::info!(
            "GPU at full power after {} ms (status 0x{:02x}, wake 0x{:02x})",
            self.stats.exit_time_ms,
            self.stats.exit_status,
            self.stats.wake_status
        );
        Ok(())
    }

    /// Re-read the EC power status after a failed transition
    pub fn resync_state(&mut self) -> Result<PowerState> {
        let status = self.ec.read_fsm_status()?;
        let state = PowerState::from(status.power_status()?);
        if state != self.state {
            tracing::info!("Power state resynchronised: {} -> {}", self.state, state);
        }
        self.state = state;
        Ok(state)
    }

    fn validate_entry(&mut self, target: TargetState) -> Result<()> {
        match self.state {
            PowerState::FullPower => {}
            PowerState::Transitioning => {
                return Err(Gc6Error::SoftwareError(
                    "previous transition failed; resync_state() first".into(),
                ))
            }
            other => {
                return Err(Gc6Error::SoftwareError(format!(
                    "cannot enter {target} from {other}"
                )))
            }
        }

        let wakeup = self.options.wakeup;
        if !wakeup.supports(target.style()) {
            return Err(Gc6Error::SoftwareError(format!(
                "wakeup '{wakeup}' cannot end a {target} transition"
            )));
        }

        if self.ec.firmware().is_none() {
            self.ec.identify()?;
        }
        if let Some(caps) = self.ec.capabilities() {
            if !caps.supports(target.fsm_mode()) {
                return Err(Gc6Error::SoftwareError(format!(
                    "EC firmware does not advertise {target}"
                )));
            }
            let hotplug = matches!(
                wakeup,
                WakeupEventKind::HotPlug | WakeupEventKind::HotUnplug | WakeupEventKind::HotPlugIrq
            );
            if hotplug && !caps.t1t2 {
                return Err(Gc6Error::SoftwareError(format!(
                    "EC firmware has no hot-plug support for wakeup '{wakeup}'"
                )));
            }
        }
        Ok(())
    }

    fn validate_exit(&self) -> Result<TransitionStyle> {
        let style = match self.state.style() {
            Some(style) => style,
            None if self.state == PowerState::Transitioning => {
                return Err(Gc6Error::SoftwareError(
                    "previous transition failed; resync_state() first".into(),
                ))
            }
            None => {
                return Err(Gc6Error::SoftwareError(format!(
                    "cannot exit from {}",
                    self.state
                )))
            }
        };

        let wakeup = self.options.wakeup;
        if !wakeup.supports(style) {
            return Err(Gc6Error::SoftwareError(format!(
                "wakeup '{wakeup}' cannot end a transition from {}",
                self.state
            )));
        }
        Ok(style)
    }

    /// Mode selection and wake-timer arming shared by both entry styles
    fn prepare_entry(&mut self, target: TargetState) -> Result<()> {
        self.ec.set_fsm_mode(target.fsm_mode())?;
        if self.options.wakeup.arms_timer() {
            self.ec.arm_wake_timer(self.options.wake_timer_ms)?;
        }
        Ok(())
    }

    /// Poll the EC with the per-call rate-limited trace
    fn poll_ec<F>(&mut self, what: &str, budget: PollBudget, mut check: F) -> Result<Duration>
    where
        F: FnMut(&mut EcProtocol<B>) -> Result<bool>,
    {
        let verbose = self.options.verbosity >= 2;
        let count = &mut self.poll_count;
        let ec = &mut self.ec;
        poll_bounded(what, budget, |attempt| {
            *count += 1;
            if verbose && *count % POLL_LOG_INTERVAL == 0 {
                tracing::debug!("{}: poll {} (total {} this call)", what, attempt + 1, *count);
            }
            check(&mut *ec)
        })
    }

    fn poll_trigger_done(&mut self, what: &str) -> Result<Duration> {
        self.poll_ec(what, TRIGGER_POLL, |ec| ec.trigger_done())
    }

    /// Poll until the EC reports full power, recording the last status byte
    fn poll_powered_on(&mut self) -> Result<Duration> {
        let mut last = None;
        let result = self.poll_ec("GPU power-on", STATUS_POLL, |ec| {
            let status = ec.read_fsm_status()?;
            last = Some(status);
            Ok(status.is_powered_on())
        });
        if let Some(status) = last {
            self.stats.exit_status = status.to_reg_value();
        }
        result
    }

    fn read_entry_status(&mut self, expected: PowerState) -> Result<()> {
        let status = self.ec.read_fsm_status()?;
        self.stats.entry_status = status.to_reg_value();
        match status.power_status() {
            Ok(reported) if PowerState::from(reported) == expected => {}
            Ok(reported) => tracing::warn!("EC reports {:?} after entering {}", reported, expected),
            Err(e) => tracing::warn!("EC status unreadable after entry: {}", e),
        }
        Ok(())
    }

    fn record_wakeup(&mut self, outcome: WakeupOutcome) {
        self.stats.i2c_bypass_mismatch |= outcome.i2c_bypass_mismatch;
        self.stats.i2c_check_mismatch |= outcome.i2c_check_mismatch;
    }

    fn dispatch_wakeup(&mut self) -> Result<()> {
        let outcome = wakeup::dispatch(&mut self.ec, self.options.wakeup)?;
        self.record_wakeup(outcome);
        Ok(())
    }

    fn record_wake_status(&mut self) -> Result<()> {
        let wake = self.ec.read_wake_status()?;
        self.stats.wake_status = wake.to_reg_value();
        tracing::debug!("Wake cause {:?} (toggled: {})", wake.cause(), wake.toggled);
        Ok(())
    }

    fn link_down(&mut self, target: LinkPowerState) -> Result<()> {
        let elapsed = self.link.disable_link(target)?;
        self.stats.link_down_ms = as_millis(elapsed);
        Ok(())
    }

    fn link_up(&mut self, target: LinkPowerState) -> Result<()> {
        let elapsed = self.link.enable_link(target)?;
        self.stats.link_up_ms = as_millis(elapsed);
        Ok(())
    }

    fn settle(&self, ms: u64) {
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Milliseconds since `start` for a step that completed; never zero
fn elapsed_ms(start: Instant) -> u64 {
    as_millis_ceil(start.elapsed()).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pci::PciAddress;
    use crate::testing::{MockCompanions, MockEc, MockTopology};
    use gc6seq_raw::map::{addr, DEFAULT_EC_ADDRESS};

    type Seq = PowerSequencer<MockEc, MockTopology, MockCompanions>;

    fn sequencer(mock: &MockEc) -> Seq {
        let options = ProtocolOptions {
            post_command_delay_ms: 0,
            link_poll_timeout_ms: 20,
            ..Default::default()
        };
        PowerSequencer::new(
            EcProtocol::new(mock.clone(), DEFAULT_EC_ADDRESS),
            LinkPowerController::new(MockTopology::new(), PciAddress::new(0, 1, 0, 0)),
            MockCompanions::new(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_target_mapping() {
        assert_eq!(TargetState::Gc6M.fsm_mode(), FsmMode::Gc6M);
        assert_eq!(TargetState::D3Cold.style(), TransitionStyle::Rtd3);
        assert_eq!(TargetState::Rtd3.reached_state(), PowerState::Rtd3Off);
        assert_eq!("GC6".parse::<TargetState>(), Ok(TargetState::Gc6));
        assert_eq!(PowerState::Gc6M.style(), Some(TransitionStyle::Gc6));
        assert_eq!(PowerState::FullPower.style(), None);
    }

    #[test]
    fn test_exit_from_full_power() {
        let mock = MockEc::new();
        let mut seq = sequencer(&mock);
        assert!(matches!(seq.exit(), Err(Gc6Error::SoftwareError(_))));
        assert_eq!(seq.stats().exit_result, ResultCode::SoftwareError);
        assert_eq!(mock.transactions(), 0);
    }

    #[test]
    fn test_enter_wrong_vendor() {
        let mock = MockEc::new();
        mock.set_register(addr::IDENTITY_BASE, 0x00);
        let mut seq = sequencer(&mock);

        assert!(matches!(
            seq.enter(TargetState::Gc6),
            Err(Gc6Error::DeviceNotFound(_))
        ));
        assert_eq!(seq.state(), PowerState::FullPower);
        assert_eq!(seq.stats().entry_result, ResultCode::DeviceNotFound);
        assert!(mock.events().is_empty());
    }

    #[test]
    fn test_enter_unadvertised_mode() {
        let mock = MockEc::new();
        mock.set_capabilities(0x01);
        let mut seq = sequencer(&mock);
        assert!(matches!(
            seq.enter(TargetState::Gc6M),
            Err(Gc6Error::SoftwareError(_))
        ));
        assert_eq!(mock.data_writes_to(addr::FSM_MODE), 0);
    }

    #[test]
    fn test_hotplug_needs_capability() {
        let mock = MockEc::new();
        mock.set_capabilities(0x0F);
        let mut seq = sequencer(&mock);
        let options = ProtocolOptions {
            wakeup: WakeupEventKind::HotPlug,
            ..seq.options().clone()
        };
        seq.set_options(options).unwrap();
        assert!(matches!(
            seq.enter(TargetState::Gc6),
            Err(Gc6Error::SoftwareError(_))
        ));
    }

    #[test]
    fn test_transitioning_requires_resync() {
        let mock = MockEc::new();
        let mut seq = sequencer(&mock);
        mock.fail_next(u32::MAX);
        seq.identify().unwrap_err();

        mock.fail_next(0);
        seq.identify().unwrap();
        mock.trigger_done_after(500);
        seq.enter(TargetState::Gc6).unwrap_err();
        assert_eq!(seq.state(), PowerState::Transitioning);

        assert!(matches!(
            seq.enter(TargetState::Gc6),
            Err(Gc6Error::SoftwareError(_))
        ));
        assert!(matches!(seq.exit(), Err(Gc6Error::SoftwareError(_))));

        // The EC did power down; only the acknowledge was lost
        assert_eq!(seq.resync_state().unwrap(), PowerState::Gc6);
        mock.trigger_done_after(0);
        seq.exit().unwrap();
        assert_eq!(seq.state(), PowerState::FullPower);
    }

    #[test]
    fn test_set_options_validates() {
        let mock = MockEc::new();
        let mut seq = sequencer(&mock);
        let bad = ProtocolOptions {
            link_poll_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(seq.set_options(bad), Err(Gc6Error::ConfigError(_))));
        assert_eq!(seq.options().link_poll_timeout_ms, 20);
    }

    #[test]
    fn test_poll_counter_resets_per_call() {
        let mock = MockEc::new();
        let mut seq = sequencer(&mock);
        mock.trigger_done_after(60);
        seq.enter(TargetState::Gc6).unwrap();
        assert_eq!(seq.poll_count, 61);

        mock.trigger_done_after(3);
        seq.exit().unwrap();
        // Exit waits on the EC power status only
        assert_eq!(seq.poll_count, 1);
    }
}
