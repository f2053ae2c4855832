pub mod authentikey;
pub mod export;
pub mod generate;
pub mod import;
pub mod init;
pub mod label;
pub mod list;
pub mod logs;
pub mod reset_factory;
pub mod status;
pub mod version;

pub use authentikey::Authentikey;
pub use export::Export;
pub use generate::Generate;
pub use import::Import;
pub use init::Init;
pub use label::Label;
pub use list::List;
pub use logs::Logs;
pub use reset_factory::ResetFactory;
pub use status::Status;
pub use version::Version;

use clap::ValueEnum;
use common::record::ExportPolicy;

/// Export policy as given on the command line
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum Policy {
    #[default]
    Allowed,
    SecureOnly,
    Authenticated,
    Forbidden,
}

impl From<Policy> for ExportPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Allowed => ExportPolicy::Allowed,
            Policy::SecureOnly => ExportPolicy::SecureOnly,
            Policy::Authenticated => ExportPolicy::AuthenticatedOnly,
            Policy::Forbidden => ExportPolicy::Forbidden,
        }
    }
}

/// Labels are shown as text when they decode, as hex otherwise
pub fn display_label(label: &[u8]) -> String {
    match std::str::from_utf8(label) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(label)),
    }
}
