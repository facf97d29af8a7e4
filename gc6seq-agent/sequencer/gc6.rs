use std::time::Instant;

use gc6seq_raw::map::FsmEvent;

use crate::common::bus::SmbusTransport;
use crate::common::poll::as_millis;
use crate::companion::CompanionConfigPreserver;
use crate::config::LinkSequencing;
use crate::error::Result;
use crate::link::{LinkPowerState, LinkTopology};
use crate::sequencer::{elapsed_ms, PowerSequencer, TargetState};

impl<B, L, C> PowerSequencer<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    pub(super) fn enter_gc6(&mut self, target: TargetState) -> Result<()> {
        let entry_link = self.options.entry_link;
        self.link_taken_down = None;

        self.prepare_entry(target)?;
        self.link.save_ltr()?;

        if entry_link == LinkSequencing::BeforeEc {
            self.link_down(LinkPowerState::LinkDisabled)?;
            self.link_taken_down = Some(LinkSequencing::BeforeEc);
        }

        let fired = Instant::now();
        self.ec.fire_event(FsmEvent::PreparePowerDown)?;
        self.poll_trigger_done("PREPARE_POWER_DOWN acknowledge")?;
        self.stats.entry_time_ms = elapsed_ms(fired);

        if entry_link == LinkSequencing::AfterEc {
            self.link_down(LinkPowerState::LinkDisabled)?;
            self.link_taken_down = Some(LinkSequencing::AfterEc);
        }

        self.settle(self.options.post_command_delay_ms);
        self.read_entry_status(target.reached_state())
    }

    pub(super) fn exit_gc6(&mut self) -> Result<()> {
        let exit_link = self.options.exit_link;
        let taken_down = self.link_taken_down;
        let start = Instant::now();

        // A link disabled ahead of the EC comes back ahead of the wake
        let early = exit_link == LinkSequencing::BeforeEc
            || taken_down == Some(LinkSequencing::BeforeEc);
        if early {
            self.link.request_enable(LinkPowerState::LinkEnabled)?;
        }

        self.dispatch_wakeup()?;

        self.settle(self.options.post_command_delay_ms);
        self.poll_powered_on()?;
        self.stats.exit_time_ms = elapsed_ms(start);
        self.record_wake_status()?;

        if early {
            let timeout = self.link.poll_timeout_ms();
            let elapsed = self.link.poll_link_status(LinkPowerState::LinkEnabled, timeout)?;
            self.stats.link_up_ms = as_millis(elapsed);
        } else if exit_link == LinkSequencing::AfterEc || taken_down.is_some() {
            self.link_up(LinkPowerState::LinkEnabled)?;
        }

        if self.options.reenable_link_after_exit {
            self.link_up(LinkPowerState::LinkEnabled)?;
        }
        self.link_taken_down = None;

        self.link.restore_ltr()
    }
}
