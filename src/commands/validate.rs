//! # Validate Job
//!
//! Resolves the templates that will be created or updated and checks them
//! against the policy-as-code rules of the configured provider. Without a
//! provider the job succeeds without checking anything.

use anyhow::Result;

use cfn_deploy::checks::{self, SystemTools};
use cfn_deploy::stack::ExecutionSettings;

use super::JobContext;

/// Execute the `validate` job.
pub fn execute(context: &JobContext) -> Result<i32> {
    let provider = context.config.policy_provider()?;
    let settings = ExecutionSettings::default();
    Ok(checks::validate(
        &context.scope,
        &context.repo_root,
        provider,
        &settings,
        &SystemTools,
    )?)
}
