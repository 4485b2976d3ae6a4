//! `config`: print configuration as TOML.

use crate::{cli::ConfigArgs, commands::Context};
use eyre::Result;
use slabd_node_core::config::SlabdConfig;
use std::io::Write;

/// Write the effective (or default) configuration to `out`.
pub fn run(ctx: &Context, args: &ConfigArgs, out: &mut impl Write) -> Result<()> {
    let config = if args.defaults { SlabdConfig::default() } else { ctx.config.clone() };
    out.write_all(toml::to_string_pretty(&config)?.as_bytes())?;
    Ok(())
}
