//! # Version Control
//!
//! The pipeline needs a handful of Git operations: the diff between the last
//! deployed commit and `HEAD`, and the tag that records the last deployed
//! commit (the deployment checkpoint).
//!
//! [`VersionControl`] is the seam the rest of the crate depends on, so the
//! scope resolver and batch coordinator can be tested with an in-memory
//! fake. [`GitRepository`] implements it with the system `git` command, which
//! automatically picks up:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Personal access tokens
//! - Any authentication configured in ~/.gitconfig

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::info;

use crate::error::{Error, Result};

/// The kind of change Git reports for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    /// Renamed or copied; the change refers to the new path.
    Renamed,
}

impl ChangeType {
    /// Parses the status letter(s) of `git diff --name-status`.
    pub fn from_status(status: &str) -> Option<Self> {
        match status.chars().next()? {
            'A' => Some(ChangeType::Added),
            'M' | 'T' => Some(ChangeType::Modified),
            'D' => Some(ChangeType::Deleted),
            'R' | 'C' => Some(ChangeType::Renamed),
            _ => None,
        }
    }
}

/// One changed file between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub change: ChangeType,
    pub path: PathBuf,
}

impl FileChange {
    pub fn new(change: ChangeType, path: impl Into<PathBuf>) -> Self {
        Self {
            change,
            path: path.into(),
        }
    }
}

/// Trait for version-control operations - allows mocking in tests
pub trait VersionControl: Send + Sync {
    /// Commit id of `HEAD`.
    fn head_commit(&self) -> Result<String>;

    /// Files changed between `old_ref` and `new_ref`.
    fn diff(&self, old_ref: &str, new_ref: &str) -> Result<Vec<FileChange>>;

    /// Commit the tag points at, or `None` if the tag does not exist locally.
    fn resolve_tag(&self, name: &str) -> Result<Option<String>>;

    /// Refreshes local tags from the remote.
    fn fetch_tags(&self) -> Result<()>;

    /// Creates `name` on `commit`. Succeeds if the tag already points there.
    fn create_tag(&self, name: &str, commit: &str) -> Result<()>;

    /// Deletes the local tag. Succeeds if it is already gone.
    fn delete_tag(&self, name: &str) -> Result<()>;

    /// Pushes the tag to the remote.
    fn push_tag(&self, name: &str) -> Result<()>;

    /// Deletes the tag from the remote. Succeeds if it is already gone.
    fn push_tag_deletion(&self, name: &str) -> Result<()>;
}

/// [`VersionControl`] backed by the `git` command in a working tree.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
    remote: String,
}

impl GitRepository {
    /// Opens the working tree at `root`, pushing to `origin`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .map_err(|e| Error::GitCommand {
                command: args.join(" "),
                stderr: e.to_string(),
            })
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VersionControl for GitRepository {
    fn head_commit(&self) -> Result<String> {
        self.run_checked(&["rev-parse", "HEAD"])
    }

    fn diff(&self, old_ref: &str, new_ref: &str) -> Result<Vec<FileChange>> {
        let stdout = self.run_checked(&["diff", "--name-status", "-M", old_ref, new_ref])?;
        Ok(parse_name_status(&stdout))
    }

    fn resolve_tag(&self, name: &str) -> Result<Option<String>> {
        let rev = format!("refs/tags/{}^{{commit}}", name);
        let output = self.run(&["rev-parse", "-q", "--verify", &rev])?;
        if output.status.success() {
            let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(commit))
        } else {
            Ok(None)
        }
    }

    fn fetch_tags(&self) -> Result<()> {
        self.run_checked(&["fetch", "--tags", "--force", &self.remote])
            .map(|_| ())
    }

    fn create_tag(&self, name: &str, commit: &str) -> Result<()> {
        info!("Tagging commit {} as {}...", commit, name);
        match self.run_checked(&["tag", name, commit]) {
            Ok(_) => Ok(()),
            Err(Error::GitCommand { stderr, .. }) if stderr.contains("already exists") => {
                match self.resolve_tag(name)? {
                    Some(existing) if existing == commit => {
                        info!("Tag already exists on commit.");
                        Ok(())
                    }
                    _ => Err(Error::GitCommand {
                        command: format!("tag {} {}", name, commit),
                        stderr: "Tag already exists on a different commit".to_string(),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        info!("Deleting tag {}...", name);
        match self.run_checked(&["tag", "-d", name]) {
            Ok(_) => Ok(()),
            Err(Error::GitCommand { stderr, .. }) if stderr.contains("not found") => {
                info!("Tag ({}) already deleted.", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn push_tag(&self, name: &str) -> Result<()> {
        info!("Pushing tag {} to remote repository...", name);
        let refspec = format!("refs/tags/{}", name);
        self.run_checked(&["push", &self.remote, &refspec]).map(|_| ())
    }

    fn push_tag_deletion(&self, name: &str) -> Result<()> {
        info!("Removing tag {} from remote repository...", name);
        let refspec = format!(":refs/tags/{}", name);
        match self.run_checked(&["push", &self.remote, &refspec]) {
            Ok(_) => Ok(()),
            Err(Error::GitCommand { stderr, .. }) if stderr.contains("remote ref does not exist") => {
                info!("Tag ({}) already deleted from remote.", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Parses `git diff --name-status` output.
///
/// Renames and copies (`R100\told\tnew`) refer to the new path; unknown
/// status letters are skipped.
pub fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            let change = ChangeType::from_status(parts.first()?)?;
            let path = match change {
                ChangeType::Renamed => parts.get(2)?,
                _ => parts.get(1)?,
            };
            Some(FileChange::new(change, *path))
        })
        .collect()
}
