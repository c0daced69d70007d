//! Pipeline runs and cleanup.

use std::sync::Arc;

use clap::Args;
use tracing::info;

use famface_pipeline::{CancelToken, DirPhotoSource, PhotoSource, Pipeline, RunOptions};

use super::Context;
use crate::oracle::ExecOracle;

#[derive(Args)]
pub struct ProcessArgs {
    /// Full run instead of incremental
    #[arg(long)]
    pub full: bool,
    /// Re-embed every face (requires --full)
    #[arg(long, requires = "full")]
    pub reembed: bool,
}

impl ProcessArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let pipeline = open_pipeline(ctx)?;
        let opts = if self.full {
            RunOptions::full(self.reembed)
        } else {
            RunOptions::incremental()
        };
        info!(photos_dir = %ctx.config.photos_dir.display(), "processing photos");
        let report = pipeline.run(&opts, &CancelToken::new())?;
        ctx.print(&report)
    }
}

/// Forgets photos missing from the photo directory. Refuses to run when the
/// directory itself is missing.
pub fn cleanup(ctx: &Context) -> anyhow::Result<()> {
    let dir = &ctx.config.photos_dir;
    if !dir.is_dir() {
        anyhow::bail!("photo directory {} does not exist", dir.display());
    }
    let source = DirPhotoSource::new(dir);
    let report = ctx.catalog()?.cleanup(|file| source.exists(file))?;
    ctx.print(&report)
}

fn open_pipeline(ctx: &Context) -> anyhow::Result<Pipeline> {
    let oracle = Arc::new(ExecOracle::new(&ctx.config.oracle.command)?);
    let pipeline = Pipeline::new(
        Arc::new(ctx.catalog()?),
        Arc::new(DirPhotoSource::new(&ctx.config.photos_dir)),
        oracle.clone(),
        oracle,
        ctx.config.pipeline(),
    )?;
    Ok(pipeline)
}
