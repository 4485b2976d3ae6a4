//! Figment-based configuration loading.
//!
//! Priority (highest wins):
//! 1. CLI arguments (applied after loading)
//! 2. Config file (TOML)
//! 3. Environment variables (`SLABD_` prefix, `__` between section and key,
//!    e.g. `SLABD_RETRIEVAL__CHAIN_ID=5`)
//! 4. Defaults

use eyre::{Result, WrapErr};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use slabd_node_core::config::SlabdConfig;
use std::path::Path;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SLABD_";

/// Load configuration from defaults, environment and, if it exists, `config_path`.
pub fn load(config_path: Option<&Path>) -> Result<SlabdConfig> {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(SlabdConfig::default()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(path) = config_path.filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(path));
    }

    figment.extract().wrap_err("failed to load configuration")
}
