use std::fmt;

use serde::Serialize;

/// Compile-time facts about a binary, filled in by its build script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
    pub target: &'static str,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, features: {}) built {} with {} for {}",
            self.version,
            self.build_profile,
            self.build_features,
            self.build_timestamp,
            self.rust_version,
            self.target
        )
    }
}

/// Collect the `BUILD_*` variables the calling crate's build script set.
///
/// Expands in the caller so the values describe that crate, not this one.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo {
            version: option_env!("REPO_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
            build_profile: option_env!("BUILD_PROFILE").unwrap_or("unknown"),
            build_features: option_env!("BUILD_FEATURES").unwrap_or("none"),
            build_timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            rust_version: option_env!("RUST_VERSION").unwrap_or("unknown"),
            target: option_env!("BUILD_TARGET").unwrap_or("unknown"),
        }
    };
}

#[cfg(test)]
mod test {
    #[test]
    fn test_falls_back_to_package_version() {
        let info = build_info!();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.to_string().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
