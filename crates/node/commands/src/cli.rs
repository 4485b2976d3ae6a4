//! CLI argument assembly and top-level parser.

use clap::{Args, Parser, Subcommand};
use slabd_node_core::{config::SlabdConfig, version};
use slabd_primitives::{CommitmentId, DealId};
use std::path::PathBuf;

pub use slabd_node_core::args::{DataDirArgs, LogArgs};

/// slabd - erasure-coded slab storage
#[derive(Debug, Parser)]
#[command(author, version = version::SHORT_VERSION, about, long_about = None)]
pub struct Cli {
    /// Logging configuration.
    #[command(flatten)]
    pub logs: LogArgs,

    /// Data directory configuration.
    #[command(flatten)]
    pub datadir: DataDirArgs,

    /// Storage overrides.
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// slabd commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store a file as a new plain slab.
    Ingest(IngestArgs),
    /// Add a file to an existing slab, producing a new slab.
    Append(AppendArgs),
    /// List the files of a slab.
    Ls(LsArgs),
    /// Write a file (or a range of it) from a slab to stdout.
    Cat(CatArgs),
    /// Print the effective configuration.
    Config(ConfigArgs),
}

/// Storage settings that override the config file.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Storage")]
pub struct StorageArgs {
    /// Slab root directory.
    #[arg(long = "storage.root", global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Concurrent unit encoders.
    #[arg(long = "ingest.parallelism", global = true, value_name = "N")]
    pub parallelism: Option<usize>,
}

impl StorageArgs {
    /// Apply the overrides that were given.
    pub fn apply(&self, config: &mut SlabdConfig) {
        if let Some(root) = &self.root {
            config.storage.root = Some(root.clone());
        }
        if let Some(parallelism) = self.parallelism {
            config.ingest.parallelism = Some(parallelism);
        }
    }
}

/// The file being stored.
#[derive(Debug, Args, Clone)]
pub struct SourceArgs {
    /// File to read.
    pub file: PathBuf,

    /// Path recorded in the slab (defaults to the file name).
    #[arg(long, value_name = "NAME")]
    pub path: Option<String>,

    /// Unix seconds recorded in the slab (defaults to the file mtime).
    #[arg(long, value_name = "SECS")]
    pub timestamp: Option<u64>,
}

/// Arguments for `ingest`.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Source file.
    #[command(flatten)]
    pub source: SourceArgs,

    /// Deal the slab belongs to.
    #[arg(long)]
    pub deal: DealId,
}

/// Arguments for `append`.
#[derive(Debug, Args)]
pub struct AppendArgs {
    /// Slab to extend.
    pub base: CommitmentId,

    /// Source file.
    #[command(flatten)]
    pub source: SourceArgs,

    /// Deal the slab belongs to.
    #[arg(long)]
    pub deal: DealId,
}

/// Arguments for `ls`.
#[derive(Debug, Args)]
pub struct LsArgs {
    /// Slab commitment (hex, with or without `0x`).
    pub id: CommitmentId,

    /// Deal scope to search as well.
    #[arg(long)]
    pub deal: Option<DealId>,
}

/// Arguments for `cat`.
#[derive(Debug, Args)]
pub struct CatArgs {
    /// Slab commitment.
    pub id: CommitmentId,

    /// File path inside the slab.
    pub path: String,

    /// Deal scope to search as well.
    #[arg(long)]
    pub deal: Option<DealId>,

    /// First byte.
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Bytes to write (0 = to end of file).
    #[arg(long, default_value_t = 0)]
    pub len: u64,
}

/// Arguments for `config`.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the effective configuration.
    #[arg(long)]
    pub defaults: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::try_parse_from([
            "slabd",
            "--datadir",
            "/tmp/slabd",
            "ingest",
            "hello.txt",
            "--deal",
            "7",
            "--timestamp",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.datadir.datadir, Some(PathBuf::from("/tmp/slabd")));
        match cli.command {
            Commands::Ingest(args) => {
                assert_eq!(args.deal, DealId(7));
                assert_eq!(args.source.file, PathBuf::from("hello.txt"));
                assert_eq!(args.source.timestamp, Some(0));
                assert_eq!(args.source.path, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_identifier() {
        assert!(Cli::try_parse_from(["slabd", "ls", "0x1234"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        // Compressed point at infinity.
        let id = format!("0xc0{}", "00".repeat(47));
        let cli = Cli::try_parse_from([
            "slabd", "cat", &id, "hello.txt", "--start", "6", "--len", "5", "-v",
            "--storage.root", "/srv/slabs",
        ])
        .unwrap();
        assert_eq!(cli.logs.verbosity, 1);
        assert_eq!(cli.storage.root, Some(PathBuf::from("/srv/slabs")));
        match cli.command {
            Commands::Cat(args) => {
                assert_eq!((args.start, args.len), (6, 5));
                assert_eq!(args.path, "hello.txt");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_storage_overrides() {
        let mut config = SlabdConfig::default();
        StorageArgs { root: Some("/srv/slabs".into()), parallelism: Some(2) }.apply(&mut config);
        assert_eq!(config.storage.root, Some(PathBuf::from("/srv/slabs")));
        assert_eq!(config.ingest.parallelism, Some(2));
    }
}
