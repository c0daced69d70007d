//! Manual corrections. Each command is one commit.

use chrono::NaiveDate;
use clap::Args;
use serde_json::json;

use famface_catalog::{ClusterId, FamilyUpdate};

use super::Context;
use super::query::FaceArg;

#[derive(Args)]
pub struct ClusterArg {
    pub cluster: u32,
}

#[derive(Args)]
pub struct NameArg {
    pub name: String,
}

#[derive(Args)]
pub struct PersonArg {
    pub person: String,
}

#[derive(Args)]
pub struct SetNameArgs {
    pub cluster: u32,
    pub name: String,
}

impl SetNameArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let relabeled = ctx.catalog()?.set_cluster_name(ClusterId(self.cluster), &self.name)?;
        ctx.print(&json!({
            "cluster": self.cluster,
            "name": self.name.trim(),
            "relabeled": relabeled,
        }))
    }
}

pub fn remove_name(ctx: &Context, args: &ClusterArg) -> anyhow::Result<()> {
    let relabeled = ctx.catalog()?.remove_cluster_name(ClusterId(args.cluster))?;
    ctx.print(&json!({ "cluster": args.cluster, "relabeled": relabeled }))
}

#[derive(Args)]
pub struct FaceNameArgs {
    pub face: String,
    pub name: String,
}

impl FaceNameArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let catalog = ctx.catalog()?;
        catalog.assign_face_name(&self.face, &self.name)?;
        ctx.print(&catalog.snapshot().face(&self.face))
    }
}

pub fn clear_face_name(ctx: &Context, args: &FaceArg) -> anyhow::Result<()> {
    let catalog = ctx.catalog()?;
    catalog.clear_face_name(&args.face)?;
    ctx.print(&catalog.snapshot().face(&args.face))
}

pub fn reset_face_name(ctx: &Context, args: &FaceArg) -> anyhow::Result<()> {
    let catalog = ctx.catalog()?;
    catalog.reset_face_name(&args.face)?;
    ctx.print(&catalog.snapshot().face(&args.face))
}

#[derive(Args)]
pub struct MergeArgs {
    /// Cluster whose faces move
    pub source: u32,
    /// Cluster that receives them
    pub target: u32,
}

impl MergeArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let outcome = ctx
            .catalog()?
            .merge_clusters(ClusterId(self.source), ClusterId(self.target))?;
        ctx.print(&outcome)
    }
}

pub fn split(ctx: &Context, args: &FaceArg) -> anyhow::Result<()> {
    ctx.print(&ctx.catalog()?.split_face(&args.face)?)
}

pub fn apply_names(ctx: &Context) -> anyhow::Result<()> {
    let changed = ctx.catalog()?.apply_name_map()?;
    ctx.print(&json!({ "relabeled": changed }))
}

#[derive(Args)]
pub struct PhotoDateArgs {
    pub file: String,
    /// New date (YYYY-MM-DD); omit to clear
    pub date: Option<NaiveDate>,
}

impl PhotoDateArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let faces = ctx.catalog()?.set_photo_date(&self.file, self.date)?;
        ctx.print(&json!({ "file": self.file, "date": self.date, "faces_updated": faces }))
    }
}

#[derive(Args)]
pub struct FamilySetArgs {
    pub person: String,
    /// Replace parents (comma separated; empty to clear)
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    pub parents: Option<Vec<String>>,
    /// Replace children (comma separated; empty to clear)
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    pub children: Option<Vec<String>>,
    /// Set spouse
    #[arg(long, conflicts_with = "no_spouse")]
    pub spouse: Option<String>,
    /// Remove spouse
    #[arg(long)]
    pub no_spouse: bool,
}

impl FamilySetArgs {
    fn update(&self) -> FamilyUpdate {
        let spouse = match (&self.spouse, self.no_spouse) {
            (Some(s), _) => Some(Some(s.clone())),
            (None, true) => Some(None),
            (None, false) => None,
        };
        FamilyUpdate {
            parents: self.parents.clone(),
            children: self.children.clone(),
            spouse,
        }
    }

    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let entry = ctx.catalog()?.upsert_family_entry(&self.person, self.update())?;
        ctx.print(&entry)
    }
}

pub fn family_delete(ctx: &Context, args: &PersonArg) -> anyhow::Result<()> {
    ctx.print(&ctx.catalog()?.delete_family_entry(&args.person)?)
}

pub fn dismiss_orphan(ctx: &Context, args: &NameArg) -> anyhow::Result<()> {
    let dropped = ctx.catalog()?.dismiss_orphan(&args.name)?;
    ctx.print(&json!({ "name": args.name, "dismissed": dropped }))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Wrap {
        #[command(flatten)]
        args: FamilySetArgs,
    }

    fn parse(argv: &[&str]) -> FamilyUpdate {
        Wrap::try_parse_from(std::iter::once("famface").chain(argv.iter().copied()))
            .unwrap()
            .args
            .update()
    }

    #[test]
    fn family_flags_map_to_partial_update() {
        let u = parse(&["Alice", "--parents", "Carol,Dave"]);
        assert_eq!(u.parents, Some(vec!["Carol".to_string(), "Dave".to_string()]));
        assert_eq!(u.children, None);
        assert_eq!(u.spouse, None);

        let u = parse(&["Alice", "--no-spouse", "--children"]);
        assert_eq!(u.children, Some(vec![]));
        assert_eq!(u.spouse, Some(None));

        let u = parse(&["Alice", "--spouse", "Bob"]);
        assert_eq!(u.spouse, Some(Some("Bob".to_string())));
    }
}
