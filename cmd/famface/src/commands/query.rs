//! Read-only commands.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use clap::Args;

use famface_catalog::{CatalogError, ClusterId, DateRange, FaceQuery, PhotoQuery};

use super::Context;

fn not_found(kind: &'static str, id: &str) -> CatalogError {
    CatalogError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[derive(Args)]
pub struct FaceArg {
    /// Face id, e.g. beach_face0
    pub face: String,
}

#[derive(Args)]
pub struct PhotoArg {
    /// Photo filename
    pub file: String,
}

#[derive(Args)]
pub struct DateArgs {
    /// Earliest date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Latest date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

impl DateArgs {
    fn range(&self) -> DateRange {
        DateRange {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Args)]
pub struct PageArgs {
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// Page size (default 100, at most 1000)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct FacesArgs {
    /// Only faces with this name
    #[arg(long)]
    pub name: Option<String>,
    /// Only faces in this cluster
    #[arg(long)]
    pub cluster: Option<u32>,
    /// Only faces without a name
    #[arg(long, conflicts_with = "recognized")]
    pub unrecognized: bool,
    /// Only faces with a name
    #[arg(long)]
    pub recognized: bool,
    #[command(flatten)]
    pub dates: DateArgs,
    #[command(flatten)]
    pub page: PageArgs,
}

impl FacesArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let unrecognized = match (self.unrecognized, self.recognized) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let query = FaceQuery {
            name: self.name.clone(),
            cluster: self.cluster.map(ClusterId),
            dates: self.dates.range(),
            unrecognized,
            offset: self.page.offset,
            limit: self.page.limit,
        };
        let snap = ctx.catalog()?.snapshot();
        ctx.print(&snap.list_faces(&query)?)
    }
}

#[derive(Args)]
pub struct PhotosArgs {
    /// Only photos with at least one face
    #[arg(long, conflicts_with = "without_faces")]
    pub with_faces: bool,
    /// Only photos without faces
    #[arg(long)]
    pub without_faces: bool,
    #[command(flatten)]
    pub dates: DateArgs,
    #[command(flatten)]
    pub page: PageArgs,
}

impl PhotosArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let has_faces = match (self.with_faces, self.without_faces) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        let query = PhotoQuery {
            dates: self.dates.range(),
            has_faces,
            offset: self.page.offset,
            limit: self.page.limit,
        };
        let snap = ctx.catalog()?.snapshot();
        ctx.print(&snap.list_photos(&query)?)
    }
}

pub fn face(ctx: &Context, args: &FaceArg) -> anyhow::Result<()> {
    let snap = ctx.catalog()?.snapshot();
    let face = snap.face(&args.face).ok_or_else(|| not_found("face", &args.face))?;
    ctx.print(face)
}

pub fn photo(ctx: &Context, args: &PhotoArg) -> anyhow::Result<()> {
    let snap = ctx.catalog()?.snapshot();
    let detail = snap.photo(&args.file).ok_or_else(|| not_found("photo", &args.file))?;
    ctx.print(&detail)
}

pub fn people(ctx: &Context) -> anyhow::Result<()> {
    ctx.print(&ctx.catalog()?.snapshot().people())
}

pub fn clusters(ctx: &Context) -> anyhow::Result<()> {
    ctx.print(&ctx.catalog()?.snapshot().clusters())
}

/// Prints the name map keyed the way it is stored (`cluster_N`).
pub fn name_map(ctx: &Context) -> anyhow::Result<()> {
    let snap = ctx.catalog()?.snapshot();
    let map: BTreeMap<String, &str> = snap
        .name_map()
        .iter()
        .map(|(id, name)| (id.key(), name.as_str()))
        .collect();
    ctx.print(&map)
}

#[derive(Args)]
pub struct FamilyArgs {
    /// Show only this person's entry
    pub person: Option<String>,
}

impl FamilyArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let snap = ctx.catalog()?.snapshot();
        match &self.person {
            Some(person) => {
                let entry = snap.family_entry(person).ok_or_else(|| not_found("person", person))?;
                ctx.print(entry)
            }
            None => ctx.print(snap.family_tree()),
        }
    }
}

#[derive(Args)]
pub struct SuggestArgs {
    pub face: String,
    /// Maximum suggestions (default from config)
    #[arg(long)]
    pub limit: Option<usize>,
}

impl SuggestArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let limit = self.limit.unwrap_or(ctx.config.suggest_limit);
        let snap = ctx.catalog()?.snapshot();
        ctx.print(&snap.suggest(&self.face, limit)?)
    }
}

#[derive(Args)]
pub struct TimelineArgs {
    /// Show one person's appearances by year
    #[arg(long)]
    pub person: Option<String>,
}

impl TimelineArgs {
    pub fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let snap = ctx.catalog()?.snapshot();
        match &self.person {
            Some(name) => ctx.print(&snap.person_timeline(name)?),
            None => ctx.print(&snap.timeline()),
        }
    }
}

pub fn stats(ctx: &Context) -> anyhow::Result<()> {
    ctx.print(&ctx.catalog()?.snapshot().stats())
}

pub fn orphans(ctx: &Context) -> anyhow::Result<()> {
    ctx.print(ctx.catalog()?.snapshot().orphaned_names())
}
