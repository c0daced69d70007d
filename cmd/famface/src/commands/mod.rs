//! CLI commands module.

mod edit;
mod process;
mod query;

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use famface_catalog::{Catalog, DirStore};

use crate::Cli;
use crate::config::{Config, load_config};

pub use edit::{
    ClusterArg, FaceNameArgs, FamilySetArgs, MergeArgs, NameArg, PersonArg, PhotoDateArgs,
    SetNameArgs, apply_names, clear_face_name, dismiss_orphan, family_delete, remove_name,
    reset_face_name, split,
};
pub use process::{ProcessArgs, cleanup};
pub use query::{
    FaceArg, FacesArgs, FamilyArgs, PhotoArg, PhotosArgs, SuggestArgs, TimelineArgs, clusters, face,
    name_map, orphans, people, photo, stats,
};

/// Resolved configuration and output settings for one invocation.
pub struct Context {
    pub config: Config,
    output: Option<PathBuf>,
    json: bool,
}

impl Context {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = load_config(cli.config.as_deref())?;
        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &cli.photos_dir {
            config.photos_dir = dir.clone();
        }
        debug!(
            config = %config.path().display(),
            data_dir = %config.data_dir.display(),
            photos_dir = %config.photos_dir.display(),
            "configuration loaded"
        );
        Ok(Self {
            config,
            output: cli.output.clone(),
            json: cli.json,
        })
    }

    /// Opens the on-disk catalog.
    pub fn catalog(&self) -> anyhow::Result<Catalog> {
        let store = DirStore::open(&self.config.data_dir, self.config.keep_generations)?;
        Ok(Catalog::open(store, self.config.commit_wait())?)
    }

    /// Outputs result as JSON or YAML.
    pub fn print<T: Serialize + ?Sized>(&self, result: &T) -> anyhow::Result<()> {
        let output = if self.json {
            serde_json::to_string_pretty(result)? + "\n"
        } else {
            serde_yaml::to_string(result)?
        };

        match &self.output {
            Some(path) => std::fs::write(path, output)?,
            None => print!("{}", output),
        }
        Ok(())
    }
}
