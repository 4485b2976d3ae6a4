//! `ingest` and `append`.

use crate::{
    cli::{AppendArgs, IngestArgs, SourceArgs},
    commands::Context,
};
use eyre::{Result, WrapErr};
use slabd_commitment::ReferenceEngine;
use slabd_ingest::{IngestRequest, IngestResult, PlainIngest};
use std::{sync::Arc, time::UNIX_EPOCH};
use tracing::info;

/// Store a file as a new slab.
pub async fn run(ctx: &Context, args: IngestArgs) -> Result<IngestResult> {
    let request = read_source(&args.source).await?;
    let result = encoder(ctx)
        .ingest(args.deal, request)
        .await
        .wrap_err_with(|| format!("failed to ingest {}", args.source.file.display()))?;
    report(&result);
    Ok(result)
}

/// Add a file to `args.base`, publishing a new slab.
pub async fn append(ctx: &Context, args: AppendArgs) -> Result<IngestResult> {
    let request = read_source(&args.source).await?;
    let result = encoder(ctx)
        .append(args.deal, &args.base, request)
        .await
        .wrap_err_with(|| format!("failed to append {} to {}", args.source.file.display(), args.base))?;
    report(&result);
    Ok(result)
}

fn encoder(ctx: &Context) -> PlainIngest {
    PlainIngest::new(Arc::new(ReferenceEngine::new()), ctx.slab_dirs(), ctx.config.ingest.to_ingest())
}

/// Read the source file into a request. The recorded timestamp is the file
/// mtime unless given explicitly.
pub async fn read_source(source: &SourceArgs) -> Result<IngestRequest> {
    let data = tokio::fs::read(&source.file)
        .await
        .wrap_err_with(|| format!("failed to read {}", source.file.display()))?;

    let path = match &source.path {
        Some(path) => path.clone(),
        None => source
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| eyre::eyre!("{} has no file name", source.file.display()))?,
    };

    let timestamp = match source.timestamp {
        Some(ts) => ts,
        None => tokio::fs::metadata(&source.file)
            .await?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs()),
    };

    Ok(IngestRequest::new(path, data).with_timestamp(timestamp))
}

fn report(result: &IngestResult) {
    info!(
        commitment = %result.commitment,
        dir = %result.dir.display(),
        path = %result.file.path,
        bytes = result.file.length,
        user_units = result.user_units,
        witness_count = result.witness_count,
        reused = result.already_published,
        "Slab ready"
    );
    println!("{}", result.commitment);
}
