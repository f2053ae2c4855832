use clap::Args;

use crate::op::CardError;

#[derive(Args, Debug, Clone)]
pub struct Status;

impl crate::op::Op for Status {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let status = ctx.with_card(false, |card, _| Ok(card.status()?))?;
        Ok(format!(
            "protocol {}.{} applet {}.{}\n\
             setup done: {}\n\
             secure channel required: {}\n\
             PIN 0 tries left: {} (PUK {})\n\
             PIN 1 tries left: {} (PUK {})",
            status.protocol_version.0,
            status.protocol_version.1,
            status.applet_version.0,
            status.applet_version.1,
            status.setup_done,
            status.needs_secure_channel,
            status.pin0_tries,
            status.puk0_tries,
            status.pin1_tries,
            status.puk1_tries,
        ))
    }
}
