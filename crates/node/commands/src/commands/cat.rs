//! `cat`: copy a file range out of a local slab.

use crate::{cli::CatArgs, commands::Context};
use eyre::{Result, WrapErr};
use slabd_slab::{SlabIndex, resolve_segment};
use std::io::{self, Write};

/// Copy the range to `out`. Returns the bytes written.
///
/// Needs the user-data units on local disk, which holds for plain slabs.
pub async fn run<W: Write + Send + 'static>(ctx: &Context, args: CatArgs, mut out: W) -> Result<(u64, W)> {
    let dirs = ctx.slab_dirs();
    tokio::task::spawn_blocking(move || -> Result<(u64, W)> {
        let dir = dirs.resolve_existing(&args.id, args.deal)?;
        let index = SlabIndex::load(&dir)?;
        let mut segment = resolve_segment(&dir, &index, &args.path, args.start, args.len)?;
        let written = io::copy(&mut segment.reader, &mut out)
            .wrap_err_with(|| format!("failed to read {} from {}", args.path, args.id))?;
        out.flush()?;
        Ok((written, out))
    })
    .await?
}
