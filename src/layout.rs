//! # Deployment Repository Layout
//!
//! Templates, parameter files and mapping files live under a fixed directory
//! convention:
//!
//! ```text
//! deployments/<region>/<environment | all_envs>/<templates | parameters | mappings>/<file>
//! ```
//!
//! This module is the Path Classifier. It turns a repository-relative path
//! into a [`TemplatePath`] (region, environment scope, kind, file name) or
//! explains why the path is not part of the layout. The segment positions are
//! named by [`LayoutSchema`] instead of being implied by magic indices, so the
//! on-disk convention has exactly one description in the code base.
//!
//! Classification never fails hard: a malformed path is reported as
//! [`Classification::Invalid`] so the caller can warn and move on.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Name of the directory holding all deployable files.
pub const DEPLOYMENTS_DIR: &str = "deployments";

/// Pseudo-environment directory for files shared by every environment.
pub const ALL_ENVS: &str = "all_envs";

/// File suffixes recognised as templates or parameter files.
pub const TEMPLATE_SUFFIXES: &[&str] = &["yaml", "yml", "template", "json", "jsn"];

/// Region codes accepted as the first layout segment.
pub const VALID_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ca-central-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
];

/// Positions of each segment in a path relative to the deployments root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSchema {
    pub region: usize,
    pub environment: usize,
    pub kind: usize,
    pub file: usize,
}

/// The layout every deployment repository follows.
pub const LAYOUT: LayoutSchema = LayoutSchema {
    region: 0,
    environment: 1,
    kind: 2,
    file: 3,
};

impl LayoutSchema {
    /// Number of segments below the deployments root.
    pub const fn depth(&self) -> usize {
        self.file + 1
    }
}

/// The three kinds of directory below an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Templates,
    Parameters,
    Mappings,
}

impl FileKind {
    /// The directory name used on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            FileKind::Templates => "templates",
            FileKind::Parameters => "parameters",
            FileKind::Mappings => "mappings",
        }
    }

    /// Parses a directory name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "templates" => Some(FileKind::Templates),
            "parameters" => Some(FileKind::Parameters),
            "mappings" => Some(FileKind::Mappings),
            _ => None,
        }
    }

    fn accepts(self, file_name: &str) -> bool {
        let suffix = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
            Some(suffix) => suffix,
            None => return false,
        };
        match self {
            FileKind::Mappings => suffix == "json",
            FileKind::Templates | FileKind::Parameters => TEMPLATE_SUFFIXES.contains(&suffix),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The environment segment of a path: shared, or one named environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvScope {
    AllEnvs,
    Env(String),
}

impl EnvScope {
    pub fn from_segment(segment: &str) -> Self {
        if segment == ALL_ENVS {
            EnvScope::AllEnvs
        } else {
            EnvScope::Env(segment.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnvScope::AllEnvs => ALL_ENVS,
            EnvScope::Env(env) => env,
        }
    }

    pub fn is_all_envs(&self) -> bool {
        matches!(self, EnvScope::AllEnvs)
    }

    /// Whether files in this scope are deployed for `target`. With no target
    /// environment every scope is in range.
    pub fn is_in_scope(&self, target: Option<&str>) -> bool {
        match (self, target) {
            (_, None) | (EnvScope::AllEnvs, _) => true,
            (EnvScope::Env(env), Some(target)) => env == target,
        }
    }
}

impl fmt::Display for EnvScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file located inside the deployments layout.
///
/// Ordering is by the repository-relative path, which gives the
/// lexicographic execution order within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplatePath {
    path: PathBuf,
    region: String,
    env: EnvScope,
    kind: FileKind,
    file_name: String,
}

impl TemplatePath {
    /// Builds a path from its parts.
    pub fn new(region: &str, env: EnvScope, kind: FileKind, file_name: &str) -> Self {
        let path = Path::new(DEPLOYMENTS_DIR)
            .join(region)
            .join(env.as_str())
            .join(kind.dir_name())
            .join(file_name);
        Self {
            path,
            region: region.to_string(),
            env,
            kind,
            file_name: file_name.to_string(),
        }
    }

    /// Repository-relative path, starting with `deployments/`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute location below `repo_root`.
    pub fn absolute(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.path)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn env(&self) -> &EnvScope {
        &self.env
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File name without its final extension (`app.json.template` -> `app.json`).
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }

    /// File name up to the first `.`; used to pair templates with parameter
    /// files by naming convention.
    pub fn base_name(&self) -> &str {
        base_name(&self.file_name)
    }

    /// Another file of `kind` in the same region and environment.
    pub fn sibling(&self, kind: FileKind, file_name: &str) -> TemplatePath {
        TemplatePath::new(&self.region, self.env.clone(), kind, file_name)
    }

    /// Repository-relative directory holding files of `kind` next to this one.
    pub fn sibling_dir(&self, kind: FileKind) -> PathBuf {
        Path::new(DEPLOYMENTS_DIR)
            .join(&self.region)
            .join(self.env.as_str())
            .join(kind.dir_name())
    }

    /// Short identifier used as the log target for work on this file.
    pub fn log_context(&self) -> String {
        format!("{}/{}/{}", self.region, self.env, self.file_name)
    }
}

impl fmt::Display for TemplatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Text before the first `.` of a file name.
pub fn base_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Outcome of classifying a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The path is a well-formed layout file.
    File(TemplatePath),
    /// The path is under the deployments root but breaks the convention.
    Invalid { reason: String },
    /// The path is not a deployable file (outside the root, or a suffix the
    /// pipeline does not handle).
    Unrelated,
}

/// Classifies paths against [`LAYOUT`], checking regions and environments.
#[derive(Debug, Clone, Default)]
pub struct PathClassifier {
    environments: Vec<String>,
}

impl PathClassifier {
    /// Creates a classifier accepting `all_envs` plus `environments`. An
    /// empty list accepts any environment name.
    pub fn new(environments: Vec<String>) -> Self {
        Self { environments }
    }

    /// Classifies a repository-relative path such as
    /// `deployments/us-east-1/dev/templates/app.yaml`.
    pub fn classify(&self, path: &Path) -> Classification {
        let segments = match segments(path) {
            Some(segments) => segments,
            None => return Classification::Unrelated,
        };
        match segments.split_first() {
            Some((first, rest)) if *first == DEPLOYMENTS_DIR => self.classify_segments(path, rest),
            _ => Classification::Unrelated,
        }
    }

    /// Classifies a path relative to the deployments root such as
    /// `us-east-1/dev/templates/app.yaml`.
    pub fn classify_relative(&self, path: &Path) -> Classification {
        match segments(path) {
            Some(segments) => self.classify_segments(path, &segments),
            None => Classification::Unrelated,
        }
    }

    fn classify_segments(&self, original: &Path, segments: &[&str]) -> Classification {
        if segments.len() != LAYOUT.depth() {
            return invalid(original, "has invalid folder structure");
        }
        let file_name = segments[LAYOUT.file];
        let kind = match FileKind::from_dir_name(segments[LAYOUT.kind]) {
            Some(kind) => kind,
            None => return invalid(original, "is not inside a templates, parameters or mappings folder"),
        };
        if !kind.accepts(file_name) {
            return Classification::Unrelated;
        }
        let region = segments[LAYOUT.region];
        if !VALID_REGIONS.contains(&region) {
            return invalid(
                original,
                &format!("is in '{}', which is not a recognised AWS region", region),
            );
        }
        let env = EnvScope::from_segment(segments[LAYOUT.environment]);
        if let EnvScope::Env(name) = &env {
            if !self.environments.is_empty() && !self.environments.contains(name) {
                return invalid(
                    original,
                    &format!("is in '{}', which is not a declared environment", name),
                );
            }
        }
        Classification::File(TemplatePath::new(region, env, kind, file_name))
    }
}

fn invalid(path: &Path, reason: &str) -> Classification {
    Classification::Invalid {
        reason: format!("File {} {} and will be ignored", path.display(), reason),
    }
}

fn segments(path: &Path) -> Option<Vec<&str>> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect()
}

/// Whether `region` is one of [`VALID_REGIONS`].
pub fn is_valid_region(region: &str) -> bool {
    VALID_REGIONS.contains(&region)
}
