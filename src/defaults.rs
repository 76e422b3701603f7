//! Default values for cfn-deploy configuration.
//!
//! This module provides centralized default values and fixed conventions used
//! across the pipeline, ensuring consistency and avoiding duplication.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the INI configuration file at the repository root.
pub const CONFIG_FILE_NAME: &str = "config";

/// Prefix of the version-control tag marking the last deployed commit.
pub const CHECKPOINT_TAG_PREFIX: &str = "cf-deployment";

/// Stack name prefix used when `stack_name_prefix` is not configured.
pub const DEFAULT_STACK_PREFIX: &str = "managed-app";

/// Seconds between stack status polls when `cf_check_period_seconds` is unset.
pub const DEFAULT_CHECK_PERIOD_SECS: u64 = 15;

/// Largest template, in bytes, that may be submitted inline. Anything larger
/// is uploaded to object storage and submitted by URL.
pub const MAX_INLINE_TEMPLATE_BYTES: u64 = 51_200;

/// Prefix of the default template-upload bucket.
pub const DEFAULT_BUCKET_PREFIX: &str = "cf-templates-";

/// Prefix of change sets created by the `plan` job.
pub const CHANGE_SET_PREFIX: &str = "cfn-deploy-change-set";

/// Capabilities acknowledged on every stack submission.
pub const STACK_CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

/// Returns the checkpoint tag name for a branch, e.g. `cf-deployment-main`.
pub fn checkpoint_tag(branch: &str) -> String {
    format!("{}-{}", CHECKPOINT_TAG_PREFIX, branch)
}

/// Returns the default poll interval.
pub fn default_check_period() -> Duration {
    Duration::from_secs(DEFAULT_CHECK_PERIOD_SECS)
}

/// Returns the IAM role ARN used to execute stack actions.
pub fn execution_role_arn(account_number: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_number, role_name)
}

/// Returns the directory where resolved templates are written for policy
/// validation.
pub fn rendered_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".cfn-deploy").join("rendered")
}

/// Returns the directory holding policy-as-code rules for `cfn-guard`.
pub fn guard_rules_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("rules").join("cfn-guard")
}
