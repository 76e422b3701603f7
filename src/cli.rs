//! CLI argument parsing and job dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;

use crate::commands::{self, JobContext};

/// cfn-deploy - Deploy the CloudFormation templates changed since the last deployment
#[derive(Parser, Debug)]
#[command(name = "cfn-deploy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Branch being built; selects the target environment and the checkpoint tag
    #[arg(long, value_name = "NAME", env = "CFN_DEPLOY_BRANCH")]
    branch: String,

    /// Pipeline job to run
    #[arg(long, value_enum)]
    job: Job,

    /// AWS account the stacks are deployed to (required for deploy and plan)
    #[arg(long, alias = "account_number", value_name = "ID")]
    account_number: Option<String>,

    /// Root of the deployment repository
    #[arg(long, value_name = "DIR", default_value = ".")]
    repo: PathBuf,

    /// AWS CLI profile used for service calls
    #[arg(long, value_name = "PROFILE", env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// A pipeline job.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    /// Lint the templates in scope with cfn-lint
    Lint,
    /// Check the resolved templates in scope against policy rules
    Validate,
    /// Create, update and delete the stacks in scope
    Deploy,
    /// Preview the creates and updates in scope as change sets
    Plan,
}

impl Cli {
    /// Runs the job and returns the process exit code.
    pub fn execute(self) -> Result<i32> {
        init_logging(&self.log_level);

        let context = JobContext::load(&self.repo, &self.branch, self.account_number, self.profile)?;
        if context.scope.changes().is_empty() {
            info!("No templates to create, update or delete. Nothing to do.");
            return Ok(0);
        }

        match self.job {
            Job::Lint => commands::lint::execute(&context),
            Job::Validate => commands::validate::execute(&context),
            Job::Deploy => commands::deploy::execute(&context),
            Job::Plan => commands::plan::execute(&context),
        }
    }
}

/// Initialises `env_logger` at `level`; `RUST_LOG` takes precedence.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).format_timestamp_secs().try_init();
}
