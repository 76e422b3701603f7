//! # Lint Job
//!
//! Runs `cfn-lint` over the templates that will be created or updated.

use anyhow::Result;

use cfn_deploy::checks::{self, SystemTools};

use super::JobContext;

/// Execute the `lint` job.
pub fn execute(context: &JobContext) -> Result<i32> {
    Ok(checks::lint(&context.scope, &context.repo_root, &SystemTools)?)
}
