//! # CLI Job Implementations
//!
//! This module contains the implementation of each pipeline job of the
//! `cfn-deploy` command-line tool. Each job is defined in its own file to
//! keep the logic separated and maintainable.
//!
//! ## Structure
//!
//! Every job module exposes an `execute` function that takes the shared
//! [`JobContext`] and returns the job's exit code. The context is built once
//! per run: it loads the configuration, resolves the branch's environment
//! and computes the pipeline scope, calling into the `cfn_deploy` library for
//! the core logic.

pub mod deploy;
pub mod lint;
pub mod plan;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use cfn_deploy::cloud::aws::AwsProvider;
use cfn_deploy::config::Configuration;
use cfn_deploy::defaults::CONFIG_FILE_NAME;
use cfn_deploy::git::GitRepository;
use cfn_deploy::layout::PathClassifier;
use cfn_deploy::scope::{PipelineScope, ScopeResolver};

/// Everything a job needs, loaded once per run.
pub struct JobContext {
    pub repo_root: PathBuf,
    pub config: Configuration,
    pub vcs: GitRepository,
    pub scope: PipelineScope,
    pub account_number: Option<String>,
    pub profile: Option<String>,
}

impl JobContext {
    /// Loads the configuration at `repo_root` and resolves the scope for
    /// `branch`.
    pub fn load(repo_root: &Path, branch: &str, account_number: Option<String>, profile: Option<String>) -> Result<Self> {
        let config = Configuration::from_file(&repo_root.join(CONFIG_FILE_NAME))?;
        let environment = config.environment_for_branch(branch);
        match &environment {
            Some(env) => info!("Branch {} deploys environment {}", branch, env),
            None => info!("Branch {} has no environment; every environment is in scope", branch),
        }

        let classifier = PathClassifier::new(config.declared_environments());
        let resolver = ScopeResolver::new(repo_root, classifier, environment);
        let vcs = GitRepository::new(repo_root);
        let scope = PipelineScope::build(&vcs, &resolver, branch)
            .with_context(|| format!("Failed to resolve the pipeline scope for branch {}", branch))?;

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            config,
            vcs,
            scope,
            account_number,
            profile,
        })
    }

    /// The account number, which `job` cannot run without.
    pub fn require_account(&self, job: &str) -> Result<&str> {
        self.account_number
            .as_deref()
            .with_context(|| format!("--account-number is required for the {} job", job))
    }

    /// AWS clients for the configured profile.
    pub fn cloud(&self) -> Result<AwsProvider> {
        AwsProvider::new(self.profile.clone()).context("Unable to start the AWS client runtime")
    }
}
