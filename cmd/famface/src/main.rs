//! famface - Face identity catalog for a family photo collection.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod oracle;

use commands::{
    ClusterArg, Context, FaceArg, FaceNameArgs, FacesArgs, FamilyArgs, FamilySetArgs, MergeArgs,
    NameArg, PersonArg, PhotoArg, PhotoDateArgs, PhotosArgs, ProcessArgs, SetNameArgs, SuggestArgs,
    TimelineArgs,
};

/// famface - Face identity catalog for a family photo collection.
///
/// Detects and clusters faces across a photo directory, keeps cluster ids and
/// names stable across re-runs, and answers questions about who appears
/// where and when.
///
/// Configuration is stored in ~/.famface/config.yaml.
#[derive(Parser)]
#[command(name = "famface")]
#[command(about = "Face identity catalog for a family photo collection")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.famface/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog directory (overrides config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Photo directory (overrides config file)
    #[arg(long, global = true)]
    pub photos_dir: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<PathBuf>,

    /// Output as JSON instead of YAML
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List faces with optional filters
    Faces(FacesArgs),
    /// Show one face
    Face(FaceArg),
    /// List photos with optional filters
    Photos(PhotosArgs),
    /// Show one photo with its faces
    Photo(PhotoArg),
    /// List named people with face counts and date ranges
    People,
    /// List clusters and unclustered faces
    Clusters,
    /// Show cluster names
    NameMap,
    /// Name a cluster; the name propagates to its faces
    SetName(SetNameArgs),
    /// Remove a cluster's name
    RemoveName(ClusterArg),
    /// Name one face only
    FaceName(FaceNameArgs),
    /// Mark one face as unrecognized
    ClearFaceName(FaceArg),
    /// Drop a face's own name so it follows its cluster again
    ResetFaceName(FaceArg),
    /// Move every face of one cluster into another
    Merge(MergeArgs),
    /// Move one face out of its cluster into a new one
    Split(FaceArg),
    /// Re-apply cluster names to all faces
    ApplyNames,
    /// Set or clear a photo's date
    PhotoDate(PhotoDateArgs),
    /// Show the family tree, or one person's entry
    Family(FamilyArgs),
    /// Create or update a family tree entry
    FamilySet(FamilySetArgs),
    /// Delete a family tree entry
    FamilyDelete(PersonArg),
    /// Suggest names for a face
    Suggest(SuggestArgs),
    /// Photos grouped by year, or one person's appearances
    Timeline(TimelineArgs),
    /// Collection statistics
    Stats,
    /// List names whose clusters disappeared
    Orphans,
    /// Forget an orphaned name
    DismissOrphan(NameArg),
    /// Forget photos that were deleted from the photo directory
    Cleanup,
    /// Ingest new photos, embed faces and re-cluster
    Process(ProcessArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "famface=debug,famface_pipeline=debug,famface_catalog=debug,info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = Context::new(&cli)?;
    match &cli.command {
        Commands::Faces(args) => args.run(&ctx),
        Commands::Face(args) => commands::face(&ctx, args),
        Commands::Photos(args) => args.run(&ctx),
        Commands::Photo(args) => commands::photo(&ctx, args),
        Commands::People => commands::people(&ctx),
        Commands::Clusters => commands::clusters(&ctx),
        Commands::NameMap => commands::name_map(&ctx),
        Commands::SetName(args) => args.run(&ctx),
        Commands::RemoveName(args) => commands::remove_name(&ctx, args),
        Commands::FaceName(args) => args.run(&ctx),
        Commands::ClearFaceName(args) => commands::clear_face_name(&ctx, args),
        Commands::ResetFaceName(args) => commands::reset_face_name(&ctx, args),
        Commands::Merge(args) => args.run(&ctx),
        Commands::Split(args) => commands::split(&ctx, args),
        Commands::ApplyNames => commands::apply_names(&ctx),
        Commands::PhotoDate(args) => args.run(&ctx),
        Commands::Family(args) => args.run(&ctx),
        Commands::FamilySet(args) => args.run(&ctx),
        Commands::FamilyDelete(args) => commands::family_delete(&ctx, args),
        Commands::Suggest(args) => args.run(&ctx),
        Commands::Timeline(args) => args.run(&ctx),
        Commands::Stats => commands::stats(&ctx),
        Commands::Orphans => commands::orphans(&ctx),
        Commands::DismissOrphan(args) => commands::dismiss_orphan(&ctx, args),
        Commands::Cleanup => commands::cleanup(&ctx),
        Commands::Process(args) => args.run(&ctx),
    }
}
