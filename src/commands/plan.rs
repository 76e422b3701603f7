//! # Plan Job
//!
//! Previews the creates and updates in scope as change sets. Nothing is
//! executed and the deployment checkpoint does not move.

use std::sync::Arc;

use anyhow::Result;

use cfn_deploy::batch::{self, BatchCoordinator};
use cfn_deploy::stack::{ExecutionSettings, SystemClock};

use super::JobContext;

/// Execute the `plan` job.
pub fn execute(context: &JobContext) -> Result<i32> {
    let account = context.require_account("plan")?;
    let deploy = context.config.deploy_settings()?;
    let settings = ExecutionSettings::from_config(&deploy, account);

    let cloud = context.cloud()?;
    let coordinator = BatchCoordinator::connect(
        &context.repo_root,
        &cloud,
        Arc::new(SystemClock),
        &context.scope.regions(),
        deploy.upload_bucket_name.as_deref(),
        settings,
    )?
    .with_max_parallel(deploy.max_parallel_stacks);

    let report = batch::plan_scope(&context.scope, &coordinator)?;
    Ok(report.exit_code())
}
