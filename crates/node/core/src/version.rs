//! Version information.

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version shown by `--version`.
pub const SHORT_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// User agent for provider requests.
pub const USER_AGENT: &str = concat!("slabd/", env!("CARGO_PKG_VERSION"));
