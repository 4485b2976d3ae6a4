//! CLI argument structs for node infrastructure.
//!
//! Each struct parses with clap (`#[derive(Args)]`) and also (de)serializes,
//! so the same shape can be flattened into commands and written to config.

mod datadir;
mod log;

pub use datadir::DataDirArgs;
pub use log::LogArgs;
