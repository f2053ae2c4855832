use clap::Args;

use super::display_label;
use crate::op::CardError;

/// Show the card label, or replace it when one is given
#[derive(Args, Debug, Clone)]
pub struct Label {
    pub label: Option<String>,

    /// Erase the label
    #[arg(long, conflicts_with = "label")]
    pub clear: bool,
}

impl crate::op::Op for Label {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        ctx.with_card(true, |card, _| {
            if self.clear {
                card.set_card_label(b"")?;
                return Ok("label cleared".to_string());
            }
            match &self.label {
                Some(label) => {
                    card.set_card_label(label.as_bytes())?;
                    Ok(format!("label set to {}", label))
                }
                None => Ok(display_label(&card.card_label()?)),
            }
        })
    }
}
