//! slabd node infrastructure.
//!
//! - [`args`] - CLI argument structs shared by every command
//! - [`config`] - `slabd.toml` sections and their conversion into component tuning
//! - [`dirs`] - data directory layout
//! - [`logging`] - tracing subscriber setup
//! - [`version`] - version strings

pub mod args;
pub mod config;
pub mod dirs;
pub mod logging;
pub mod version;
