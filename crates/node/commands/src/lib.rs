//! slabd command line.
//!
//! - [`Cli`] - top-level parser
//! - [`Commands`] - subcommands
//! - [`config`] - figment loading of `slabd.toml`
//!
//! Configuration priority (highest wins):
//!
//! 1. CLI arguments
//! 2. Config file (TOML)
//! 3. Environment variables (`SLABD_` prefix)
//! 4. Defaults

mod cli;
pub mod commands;
pub mod config;

pub use cli::{
    AppendArgs, CatArgs, Cli, Commands, ConfigArgs, IngestArgs, LsArgs, SourceArgs, StorageArgs,
};
pub use commands::Context;

use clap::Parser;
use color_eyre::eyre;
use slabd_node_core::{logging, version};
use tracing::debug;

/// Parse arguments and run the selected command.
pub async fn run() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;
    debug!(version = version::VERSION, "Starting slabd");

    let ctx = Context::load(&cli)?;
    match cli.command {
        Commands::Ingest(args) => {
            commands::ingest::run(&ctx, args).await?;
        }
        Commands::Append(args) => {
            commands::ingest::append(&ctx, args).await?;
        }
        Commands::Ls(args) => {
            commands::ls::run(&ctx, args, &mut std::io::stdout().lock()).await?;
        }
        Commands::Cat(args) => {
            commands::cat::run(&ctx, args, std::io::stdout()).await?;
        }
        Commands::Config(args) => {
            commands::config::run(&ctx, &args, &mut std::io::stdout().lock())?;
        }
    }

    Ok(())
}
