//! Logging CLI arguments.

use clap::Args;
use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LogArgs {
    /// Silence everything below errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub verbosity: u8,

    /// Extra filter directives (e.g. "slabd_erasure=trace,reqwest=warn").
    #[arg(long = "log.filter", global = true, value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long = "log.json", global = true)]
    pub json: bool,
}

impl LogArgs {
    /// Level used when `RUST_LOG` is unset.
    pub fn base_level(&self) -> &'static str {
        match (self.quiet, self.verbosity) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}
