//! Command implementations.
//!
//! Every command runs against a [`Context`]: the resolved data directory and
//! the effective configuration. Slabs are built with the reference
//! commitment engine and published locally; erasure ingest needs a ledger
//! and provider network and is not exposed here.

pub mod cat;
pub mod config;
pub mod ingest;
pub mod ls;

use crate::{cli::Cli, config as loader};
use eyre::{Result, bail};
use slabd_node_core::{config::SlabdConfig, dirs::DataDirs};
use slabd_slab::SlabDirs;
use tracing::debug;

/// Resolved data directory and configuration.
#[derive(Debug, Clone)]
pub struct Context {
    /// Data directory.
    pub dirs: DataDirs,
    /// Effective configuration.
    pub config: SlabdConfig,
}

impl Context {
    /// Resolve directories and load configuration for `cli`.
    ///
    /// An explicit `--config` must exist; the default config file is optional.
    pub fn load(cli: &Cli) -> Result<Self> {
        let dirs = DataDirs::new(&cli.datadir)?;
        let config_file = dirs.config_file();
        if cli.datadir.config.is_some() && !config_file.is_file() {
            bail!("config file {} does not exist", config_file.display());
        }
        let mut config = loader::load(Some(&config_file))?;
        cli.storage.apply(&mut config);
        debug!(datadir = %dirs.root.display(), config = %config_file.display(), "Loaded configuration");
        Ok(Self { dirs, config })
    }

    /// Context over explicit parts.
    pub fn new(dirs: DataDirs, config: SlabdConfig) -> Self {
        Self { dirs, config }
    }

    /// Slab tree under the configured root.
    pub fn slab_dirs(&self) -> SlabDirs {
        SlabDirs::new(self.config.storage.slab_root(&self.dirs))
    }
}
