use clap::Args;

use common::device::{AuditRecord, Instruction};

use crate::op::CardError;

/// Print the audit log, newest record first
#[derive(Args, Debug, Clone)]
pub struct Logs;

fn id_field(id: u16) -> String {
    match id {
        0xFFFF => "-".to_string(),
        id => id.to_string(),
    }
}

fn describe(record: &AuditRecord) -> String {
    let name = match Instruction::try_from(record.ins) {
        Ok(ins) => format!("{:?}", ins),
        Err(_) => "Unknown".to_string(),
    };
    format!(
        "{:#04x} {:<22} {:>5} {:>5}  {:04X}",
        record.ins,
        name,
        id_field(record.id1),
        id_field(record.id2),
        record.status,
    )
}

impl crate::op::Op for Logs {
    type Error = CardError;
    type Output = String;

    fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let logs = ctx.with_card(true, |card, _| Ok(card.logs()?))?;
        let mut lines = vec![format!(
            "{} records written, {} kept",
            logs.total, logs.available
        )];
        lines.extend(logs.records.iter().map(describe));
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_record() {
        let record = AuditRecord::new(Instruction::ExportSecret.byte(), Some(3), None, 0x9C31);
        let line = describe(&record);
        assert!(line.contains("ExportSecret"));
        assert!(line.contains("9C31"));
        assert!(line.contains(" -"));
    }
}
