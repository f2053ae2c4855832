use clap::Args;

use crate::op::CardError;

/// Print the card identity, checked against the handshake signature
#[derive(Args, Debug, Clone)]
pub struct Authentikey;

impl crate::op::Op for Authentikey {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        ctx.with_card(true, |card, _| Ok(card.authentikey()?.to_hex()))
    }
}
