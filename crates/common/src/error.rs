use std::fmt;

/// Coarse classification shared by every error in the crate.
///
/// Module errors (`ChannelError`, `StoreError`, `TransferError`, ...) each
/// expose a `kind()` so callers can react to the class of failure without
/// matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or blocked PIN, missing login, channel not ready, setup state
    Authentication,
    /// Malformed parameters, wrong phase order, unknown instruction
    Protocol,
    /// Stale or reused channel IV
    Replay,
    /// MAC, signature or padding mismatch
    Integrity,
    /// Export refused by the record's policy
    Policy,
    /// Store exhausted or record too large
    Resource,
    /// Referenced object is absent
    NotFound,
    /// Transfer phase without, or conflicting with, the held lock
    Lock,
    /// Entropy or backend failure
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Replay => "replay",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Policy => "policy",
            ErrorKind::Resource => "resource",
            ErrorKind::NotFound => "not found",
            ErrorKind::Lock => "lock",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}
