//! Shared test utilities for integration and E2E tests.
//!
//! This module provides a deployment-repository fixture (a Git working tree
//! in a temporary directory with a `config` file) and helpers to commit and
//! tag in it.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let repo = TestRepo::new().with_config(configs::BASIC);
//!     repo.commit_all("initial");
//!     // ... test code
//! }
//! ```

use assert_fs::prelude::*;
use std::path::Path;
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    #[allow(unused_imports)]
    pub use super::git_available;
    pub use super::TestRepo;
}

/// Common `config` file contents for testing.
#[allow(dead_code)]
pub mod configs {
    /// `develop` deploys `dev`, `main` deploys `prod`.
    pub const BASIC: &str = r#"
[branches]
develop = dev
main = prod

[settings]
stack_execution_role_name = cfn-deploy-role
cf_check_period_seconds = 1
"#;

    /// Branch mapping without a `[settings]` section.
    pub const BRANCHES_ONLY: &str = r#"
[branches]
develop = dev
"#;
}

/// Minimal template body.
#[allow(dead_code)]
pub const TEMPLATE: &str = "Resources:\n  Queue:\n    Type: AWS::SQS::Queue\n";

/// Whether a `git` executable is available.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A deployment repository in a temporary directory.
pub struct TestRepo {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestRepo {
    /// Create an empty Git working tree.
    pub fn new() -> Self {
        let repo = Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        };
        repo.git(&["init", "--quiet"]);
        repo.git(&["config", "user.email", "pipeline@example.com"]);
        repo.git(&["config", "user.name", "Pipeline"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo
    }

    /// Create a directory that is not a Git working tree.
    pub fn without_git() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Add the `config` file with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.write("config", content);
        self
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.write(path, content);
        self
    }

    pub fn write(&self, path: &str, content: &str) {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.path().join(path)).expect("Failed to remove file");
    }

    /// Get the path to the working tree.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Run `git` in the working tree and return its trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.path())
            .args(args)
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Stage everything and commit. Returns the new commit id.
    pub fn commit_all(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        self.git(&["commit", "--quiet", "--allow-empty", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    /// Tag `commit` as `name`.
    pub fn tag(&self, name: &str, commit: &str) {
        self.git(&["tag", "-f", name, commit]);
    }

    /// Create a command for the cfn-deploy binary rooted at this repository.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("cfn-deploy");
        cmd.arg("--repo").arg(self.path()).env_remove("RUST_LOG");
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_is_a_work_tree() {
        if !git_available() {
            return;
        }
        let repo = TestRepo::new().with_config(configs::BASIC);
        let head = repo.commit_all("initial");
        assert_eq!(head.len(), 40);
        assert!(repo.path().join("config").exists());
    }
}
