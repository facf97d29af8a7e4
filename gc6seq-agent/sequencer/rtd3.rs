use std::time::Instant;

use gc6seq_raw::map::FsmEvent;

use crate::common::bus::SmbusTransport;
use crate::companion::CompanionConfigPreserver;
use crate::error::Result;
use crate::link::{LinkPowerState, LinkTopology};
use crate::sequencer::{elapsed_ms, PowerSequencer, TargetState, WAKE_TOGGLE_POLL};
use crate::wakeup::WakeupEventKind;

impl<B, L, C> PowerSequencer<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    pub(super) fn enter_rtd3(&mut self, target: TargetState) -> Result<()> {
        self.prepare_entry(target)?;
        self.link.save_ltr()?;

        self.link_down(LinkPowerState::L2)?;
        self.settle(self.options.post_l2_entry_delay_ms);

        // Config space is lost once PERST# is asserted
        if self.options.preserve_companions {
            self.companions.save_all()?;
        }

        let fired = Instant::now();
        self.ec.fire_event(FsmEvent::PexResetAssert)?;
        self.poll_trigger_done("PEX_RESET_ASSERT acknowledge")?;
        self.stats.entry_time_ms = elapsed_ms(fired);

        self.settle(self.options.post_command_delay_ms);
        self.read_entry_status(target.reached_state())
    }

    pub(super) fn exit_rtd3(&mut self) -> Result<()> {
        let start = Instant::now();

        self.dispatch_wakeup()?;

        if self.options.wakeup == WakeupEventKind::Rtd3GpuTimer {
            self.poll_ec("GPU wake timer toggle", WAKE_TOGGLE_POLL, |ec| {
                Ok(ec.read_wake_status()?.toggled)
            })?;
        }

        self.ec.fire_event(FsmEvent::PexResetDeassert)?;
        self.poll_trigger_done("PEX_RESET_DEASSERT acknowledge")?;

        self.settle(self.options.post_command_delay_ms);
        self.poll_powered_on()?;
        self.stats.exit_time_ms = elapsed_ms(start);
        self.record_wake_status()?;

        self.link_up(LinkPowerState::L0)?;
        self.settle(self.options.post_l2_exit_delay_ms);

        if self.options.preserve_companions {
            self.companions.restore_all()?;
        }
        self.link.restore_ltr()?;

        let timeout = self.link.poll_timeout_ms();
        let elapsed = self.link.poll_device_present(timeout)?;
        tracing::debug!("GPU identity visible again after {:?}", elapsed);
        Ok(())
    }
}
