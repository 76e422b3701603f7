//! # Pipeline Scope
//!
//! The scope of a pipeline run is the set of templates to create, update and
//! delete. It is derived from the Git diff between the deployment checkpoint
//! (the tag on the last fully deployed commit) and `HEAD`:
//!
//! 1.  Every changed path is classified against the deployments layout.
//!     Malformed paths are warned about and skipped.
//! 2.  A changed template is its own target. A changed parameter file is
//!     traced back to its template through the `parameters` mapping file, or
//!     by matching base names in the sibling `templates` folder.
//! 3.  Targets outside the branch's environment are dropped; `all_envs`
//!     targets are always kept.
//! 4.  Each target lands in exactly one of the three lists. Added and
//!     modified targets must still be readable on disk.
//!
//! Without a checkpoint (first deployment) or without a target environment,
//! diffing is bypassed and every template on disk in range is scheduled as an
//! update, which the orchestrator treats as an idempotent upsert.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::defaults;
use crate::error::Result;
use crate::git::{ChangeType, FileChange, VersionControl};
use crate::layout::{Classification, EnvScope, FileKind, PathClassifier, TemplatePath, DEPLOYMENTS_DIR, LAYOUT};
use crate::mappings::{MappingKind, MappingTable};
use crate::stack::StackAction;

/// Templates to create, update and delete, in insertion order.
///
/// A template appears in at most one list, at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    create: Vec<TemplatePath>,
    update: Vec<TemplatePath>,
    delete: Vec<TemplatePath>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path` to the list for `action` unless it is already scheduled
    /// anywhere. Returns whether it was added.
    pub fn insert(&mut self, action: StackAction, path: TemplatePath) -> bool {
        if self.contains(&path) {
            return false;
        }
        match action {
            StackAction::Create => self.create.push(path),
            StackAction::Update => self.update.push(path),
            StackAction::Delete => self.delete.push(path),
        }
        true
    }

    pub fn contains(&self, path: &TemplatePath) -> bool {
        self.create.contains(path) || self.update.contains(path) || self.delete.contains(path)
    }

    pub fn create(&self) -> &[TemplatePath] {
        &self.create
    }

    pub fn update(&self) -> &[TemplatePath] {
        &self.update
    }

    pub fn delete(&self) -> &[TemplatePath] {
        &self.delete
    }

    /// The list for `action`.
    pub fn for_action(&self, action: StackAction) -> &[TemplatePath] {
        match action {
            StackAction::Create => &self.create,
            StackAction::Update => &self.update,
            StackAction::Delete => &self.delete,
        }
    }

    /// Templates that will be submitted (create and update).
    pub fn deployable(&self) -> impl Iterator<Item = &TemplatePath> {
        self.create.iter().chain(self.update.iter())
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits a list into its `all_envs` part and its environment part, each
/// sorted by path. Shared templates must be deployed first.
pub fn split_by_env(templates: &[TemplatePath]) -> (Vec<TemplatePath>, Vec<TemplatePath>) {
    let (mut shared, mut specific): (Vec<_>, Vec<_>) =
        templates.iter().cloned().partition(|t| t.env().is_all_envs());
    shared.sort();
    specific.sort();
    (shared, specific)
}

/// Turns changed files into a [`ChangeSet`] for one target environment.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    repo_root: PathBuf,
    classifier: PathClassifier,
    environment: Option<String>,
}

impl ScopeResolver {
    pub fn new(repo_root: impl Into<PathBuf>, classifier: PathClassifier, environment: Option<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            classifier,
            environment,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Builds the change set from a diff.
    ///
    /// Additions are processed first, then modifications and renames, then
    /// deletions, so a template touched in several ways keeps its first
    /// classification.
    pub fn resolve_changes(&self, changes: &[FileChange]) -> Result<ChangeSet> {
        let mut scope = ChangeSet::new();
        let mut mappings = BTreeMap::new();
        let passes = [
            ChangeType::Added,
            ChangeType::Modified,
            ChangeType::Renamed,
            ChangeType::Deleted,
        ];
        for pass in passes {
            for change in changes.iter().filter(|c| c.change == pass) {
                self.resolve_change(change, &mut scope, &mut mappings)?;
            }
        }
        Ok(scope)
    }

    fn resolve_change(
        &self,
        change: &FileChange,
        scope: &mut ChangeSet,
        mappings: &mut BTreeMap<(String, EnvScope), MappingTable>,
    ) -> Result<()> {
        let file = match self.classifier.classify(&change.path) {
            Classification::File(file) => file,
            Classification::Invalid { reason } => {
                warn!("{}", reason);
                return Ok(());
            }
            Classification::Unrelated => return Ok(()),
        };

        let (target, action) = match (file.kind(), change.change) {
            (FileKind::Templates, ChangeType::Added) => (file, StackAction::Create),
            (FileKind::Templates, ChangeType::Deleted) => (file, StackAction::Delete),
            (FileKind::Templates, _) => (file, StackAction::Update),
            (FileKind::Parameters, ChangeType::Deleted) => {
                debug!("Deleted parameter file {} does not trigger a stack action", file);
                return Ok(());
            }
            (FileKind::Parameters, _) => match self.template_for_parameter_file(&file, mappings)? {
                Some(template) => (template, StackAction::Update),
                None => return Ok(()),
            },
            (FileKind::Mappings, _) => {
                debug!("Mapping file {} changes only take effect with their templates", file);
                return Ok(());
            }
        };

        if !target.env().is_in_scope(self.environment()) {
            debug!("{} is outside the target environment", target);
            return Ok(());
        }
        self.schedule(scope, action, target);
        Ok(())
    }

    fn schedule(&self, scope: &mut ChangeSet, action: StackAction, target: TemplatePath) {
        if action != StackAction::Delete && !is_readable(&target.absolute(&self.repo_root)) {
            warn!(
                "File ({}) not found. No stack actions will be taken on the file.",
                target
            );
            return;
        }
        scope.insert(action, target);
    }

    /// Finds the template a parameter file configures.
    ///
    /// The `parameters` mapping file wins; otherwise exactly one template in
    /// the sibling `templates` folder must share the parameter file's base
    /// name.
    pub fn template_for_parameter_file(
        &self,
        param: &TemplatePath,
        mappings: &mut BTreeMap<(String, EnvScope), MappingTable>,
    ) -> Result<Option<TemplatePath>> {
        let key = (param.region().to_string(), param.env().clone());
        if !mappings.contains_key(&key) {
            let table = MappingTable::load(
                &self.repo_root,
                MappingKind::Parameters,
                param.region(),
                param.env(),
                self.environment(),
            )?;
            mappings.insert(key.clone(), table);
        }
        if let Some(template) = mappings.get(&key).and_then(|t| t.get(param.file_name())) {
            return Ok(Some(param.sibling(FileKind::Templates, template)));
        }

        warn!(
            "Unable to identify template file corresponding to parameter file '{}' via a mapping file. \
             Attempting to locate template via default naming convention...",
            param
        );
        let template_dir = self.repo_root.join(param.sibling_dir(FileKind::Templates));
        let mut candidates = self.templates_in(&template_dir)?;
        candidates.retain(|t| t.base_name() == param.base_name());
        match candidates.len() {
            1 => Ok(candidates.pop()),
            0 => {
                warn!("No template found corresponding to {}. File will be ignored", param);
                Ok(None)
            }
            _ => {
                let names: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                warn!(
                    "Multiple files found corresponding to the default naming convention: [{}]. \
                     Files will be ignored if they are not located in the repo's diff.",
                    names.join(", ")
                );
                Ok(None)
            }
        }
    }

    /// Templates directly inside `dir`, sorted by path.
    fn templates_in(&self, dir: &Path) -> Result<Vec<TemplatePath>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut templates = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.repo_root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if let Classification::File(t) = self.classifier.classify(&rel) {
                if t.kind() == FileKind::Templates {
                    templates.push(t);
                }
            }
        }
        templates.sort();
        Ok(templates)
    }

    /// Every template on disk in range of the target environment, scheduled
    /// as updates.
    pub fn full_scope(&self) -> Result<ChangeSet> {
        match self.environment() {
            Some(env) => info!("Gathering all_envs and {} template files...", env),
            None => info!("Gathering all template files..."),
        }
        let root = self.repo_root.join(DEPLOYMENTS_DIR);
        let mut templates = Vec::new();
        if root.is_dir() {
            for entry in WalkDir::new(&root)
                .min_depth(LAYOUT.depth())
                .max_depth(LAYOUT.depth())
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match entry.path().strip_prefix(&root) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                match self.classifier.classify_relative(rel) {
                    Classification::File(t) if t.kind() == FileKind::Templates => {
                        if t.env().is_in_scope(self.environment()) {
                            templates.push(t);
                        }
                    }
                    Classification::Invalid { reason } => warn!("{}", reason),
                    _ => {}
                }
            }
        } else {
            warn!("Deployments directory {} does not exist", root.display());
        }
        templates.sort();
        let mut scope = ChangeSet::new();
        for template in templates {
            self.schedule(&mut scope, StackAction::Update, template);
        }
        Ok(scope)
    }
}

fn is_readable(path: &Path) -> bool {
    fs::File::open(path).map(|_| path.is_file()).unwrap_or(false)
}

/// Looks up the deployment checkpoint for `branch`, fetching tags from the
/// remote if it is not known locally.
pub fn find_checkpoint(vcs: &dyn VersionControl, branch: &str) -> Result<Option<String>> {
    let tag = defaults::checkpoint_tag(branch);
    if let Some(commit) = vcs.resolve_tag(&tag)? {
        return Ok(Some(commit));
    }
    if let Err(e) = vcs.fetch_tags() {
        warn!("Unable to fetch tags from remote: {}", e);
    }
    let commit = vcs.resolve_tag(&tag)?;
    if commit.is_none() {
        warn!(
            "Tag '{}' does not exist. Pipeline will attempt to deploy all relevant CloudFormation stacks.",
            tag
        );
    }
    Ok(commit)
}

/// The resolved scope of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineScope {
    branch: String,
    environment: Option<String>,
    checkpoint: Option<String>,
    head: String,
    changes: ChangeSet,
}

impl PipelineScope {
    /// Determines what to deploy for `branch`.
    pub fn build(vcs: &dyn VersionControl, resolver: &ScopeResolver, branch: &str) -> Result<Self> {
        let checkpoint = find_checkpoint(vcs, branch)?;
        let head = vcs.head_commit()?;
        let changes = match (&checkpoint, resolver.environment()) {
            (Some(previous), Some(_)) => {
                let diff = vcs.diff(previous, &head)?;
                resolver.resolve_changes(&diff)?
            }
            _ => resolver.full_scope()?,
        };
        info!(
            "Scope for branch {}: {} to create, {} to update, {} to delete",
            branch,
            changes.create().len(),
            changes.update().len(),
            changes.delete().len()
        );
        Ok(Self {
            branch: branch.to_string(),
            environment: resolver.environment().map(str::to_string),
            checkpoint,
            head,
            changes,
        })
    }

    /// Builds a scope from already-resolved parts.
    pub fn from_parts(branch: &str, environment: Option<&str>, checkpoint: Option<&str>, head: &str, changes: ChangeSet) -> Self {
        Self {
            branch: branch.to_string(),
            environment: environment.map(str::to_string),
            checkpoint: checkpoint.map(str::to_string),
            head: head.to_string(),
            changes,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Regions touched by the scope, sorted.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .changes
            .create()
            .iter()
            .chain(self.changes.update())
            .chain(self.changes.delete())
            .map(|t| t.region().to_string())
            .collect();
        regions.sort();
        regions.dedup();
        regions
    }

    /// Moves the checkpoint tag to the deployed `HEAD` commit.
    pub fn advance_checkpoint(&self, vcs: &dyn VersionControl) -> Result<()> {
        let tag = defaults::checkpoint_tag(&self.branch);
        if self.checkpoint.is_some() {
            vcs.delete_tag(&tag)?;
            vcs.push_tag_deletion(&tag)?;
        }
        vcs.create_tag(&tag, &self.head)?;
        vcs.push_tag(&tag)?;
        info!("Deployment checkpoint {} now points at {}", tag, self.head);
        Ok(())
    }
}
