//! Data directory CLI arguments.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where slabd keeps its slabs, session database and config file.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Datadir")]
#[serde(default)]
pub struct DataDirArgs {
    /// Data directory.
    #[arg(long, global = true, value_name = "PATH", env = "SLABD_DATADIR")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datadir: Option<PathBuf>,

    /// Config file (defaults to `<datadir>/slabd.toml`).
    #[arg(long, global = true, value_name = "FILE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}
