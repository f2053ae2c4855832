use clap::Args;

use super::display_label;
use crate::op::CardError;

#[derive(Args, Debug, Clone)]
pub struct List;

impl crate::op::Op for List {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let entries = ctx.with_card(true, |card, _| Ok(card.list_headers()?))?;
        if entries.is_empty() {
            return Ok("No secrets found".to_string());
        }

        let output = entries
            .iter()
            .map(|entry| {
                let header = &entry.header;
                format!(
                    "{:>5}  {:<22} {:<18} {}  exports plain={} secure={} pubkey={}  {}",
                    entry.id,
                    header.secret_type.to_string(),
                    format!("{:?}", header.export_policy),
                    hex::encode(header.fingerprint),
                    header.counters.plain,
                    header.counters.secure,
                    header.counters.pubkey,
                    display_label(header.label()),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }
}
