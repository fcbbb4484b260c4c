//! Remote project providers.
//!
//! A provider answers whether a store has a remote counterpart and where to
//! clone it from, receives pushes after commits and drops the counterpart when
//! the store is deleted. Deployments without a remote use [`NoRemote`].

use crate::core::error::HoustonError;
use crate::gitstore::git;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Project {
    pub id: String,
    pub ssh_url: String,
    pub description: Option<String>,
    pub tag_list: Vec<String>,
}

pub trait RemoteProvider: Send + Sync {
    fn get_project(&self, id: &str) -> Result<Option<Project>, HoustonError>;

    fn is_project_on_remote(&self, id: &str) -> Result<bool, HoustonError> {
        Ok(self.get_project(id)?.is_some())
    }

    /// Publish the current branch of the store repository at `repo`, creating
    /// the remote project when it does not exist yet.
    fn push(&self, _id: &str, _repo: &Path) -> Result<(), HoustonError> {
        Ok(())
    }

    /// Remove the remote project of a deleted store. Missing projects are fine.
    fn delete_project(&self, _id: &str) -> Result<(), HoustonError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemote;

impl RemoteProvider for NoRemote {
    fn get_project(&self, _id: &str) -> Result<Option<Project>, HoustonError> {
        Ok(None)
    }
}

/// Provider backed by a directory of repositories named by store id
/// (`<root>/<id>` or `<root>/<id>.git`). New projects are bare `<id>.git`.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    root: PathBuf,
    tags: Vec<String>,
}

impl LocalRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tags: Vec::new(),
        }
    }

    /// Tags reported on every project (e.g. `type:archive`).
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    fn candidates(&self, id: &str) -> [PathBuf; 2] {
        [self.root.join(id), self.root.join(format!("{}.git", id))]
    }
}

impl RemoteProvider for LocalRemote {
    fn get_project(&self, id: &str) -> Result<Option<Project>, HoustonError> {
        Ok(self.candidates(id).into_iter().find(|p| p.is_dir()).map(|path| Project {
            id: id.to_string(),
            ssh_url: path.to_string_lossy().into_owned(),
            description: None,
            tag_list: self.tags.clone(),
        }))
    }

    fn push(&self, id: &str, repo: &Path) -> Result<(), HoustonError> {
        let url = match self.get_project(id)? {
            Some(project) => project.ssh_url,
            None => {
                let bare = self.root.join(format!("{}.git", id));
                git::init_bare(&bare)?;
                info!(store = %id, remote = %bare.display(), "Created remote project");
                bare.to_string_lossy().into_owned()
            }
        };
        if !git::has_remote(repo, "origin") {
            git::add_remote(repo, "origin", &url)?;
        }
        git::push(repo, "origin")
    }

    fn delete_project(&self, id: &str) -> Result<(), HoustonError> {
        for path in self.candidates(id) {
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
                info!(store = %id, remote = %path.display(), "Deleted remote project");
            }
        }
        Ok(())
    }
}
