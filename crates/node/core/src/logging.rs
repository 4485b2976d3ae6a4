//! Logging setup.

use crate::args::LogArgs;
use eyre::Result;
use tracing_subscriber::EnvFilter;

/// Build the filter for `args`.
///
/// `--quiet` wins outright. Otherwise `RUST_LOG` is used when set, falling
/// back to the level implied by `-v`, and `--log.filter` directives are
/// layered on top. Unparseable directives are skipped.
pub fn build_filter(args: &LogArgs) -> EnvFilter {
    if args.quiet {
        return EnvFilter::new("error");
    }
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.base_level()));
    if let Some(custom) = &args.filter {
        for directive in custom.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init_logging(args: &LogArgs) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(args))
        .with_writer(std::io::stderr);
    let installed = if args.json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|e| eyre::eyre!("failed to install tracing subscriber: {e}"))
}
