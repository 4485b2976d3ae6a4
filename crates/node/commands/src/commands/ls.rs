//! `ls`: list the files of a slab.

use crate::{cli::LsArgs, commands::Context};
use eyre::Result;
use slabd_slab::{FileEntry, SlabIndex};
use std::io::Write;

/// Write one tab-separated line per live file: path, length, start, timestamp.
pub async fn run(ctx: &Context, args: LsArgs, out: &mut impl Write) -> Result<Vec<FileEntry>> {
    let dirs = ctx.slab_dirs();
    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<FileEntry>> {
        let dir = dirs.resolve_existing(&args.id, args.deal)?;
        let index = SlabIndex::load(&dir)?;
        Ok(index.list().into_iter().cloned().collect())
    })
    .await??;

    for entry in &entries {
        writeln!(out, "{}\t{}\t{}\t{}", entry.path, entry.length, entry.start, entry.timestamp)?;
    }
    Ok(entries)
}
