//! # Pipeline Configuration
//!
//! This module loads the INI-format `config` file committed at the root of
//! the deployment repository. The file has two sections:
//!
//! - **`[branches]`**: maps a branch name to the environment it deploys
//!   (`main = prod`). A branch without an entry has no target environment,
//!   which widens the pipeline scope to every environment on disk. The set of
//!   mapped environments is also the list of declared environments.
//! - **`[settings]`**: execution role, poll period, stack naming, upload
//!   bucket, policy provider and the concurrency/timeout knobs.
//!
//! Parsing is done with the `rust-ini` crate; typed accessors convert the raw
//! strings and report malformed values as configuration errors naming the
//! offending key.

use std::path::Path;
use std::time::Duration;

use ini::Ini;

use crate::defaults;
use crate::error::{Error, Result};

const BRANCHES_SECTION: &str = "branches";
const SETTINGS_SECTION: &str = "settings";

/// Policy-as-code engine used by the `validate` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyProvider {
    /// AWS CloudFormation Guard (`cfn-guard`).
    Guard,
}

/// Settings consumed by the stack orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploySettings {
    pub execution_role_name: String,
    pub check_period: Duration,
    pub stack_name_prefix: Option<String>,
    pub termination_protection: bool,
    pub upload_bucket_name: Option<String>,
    pub retain_failed_resources: bool,
    pub max_parallel_stacks: usize,
    pub stack_timeout: Option<Duration>,
}

/// The loaded pipeline configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    ini: Ini,
}

impl Configuration {
    /// Loads the configuration file from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Config {
                message: format!("Configuration file does not exist at: {}", path.display()),
                hint: Some(
                    "Create the file and commit it to the repository with the pipeline options"
                        .to_string(),
                ),
            });
        }
        let ini = Ini::load_from_file(path)?;
        Ok(Self { ini })
    }

    /// Parses configuration from an in-memory INI string.
    pub fn parse(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content).map_err(|e| Error::Config {
            message: format!("Invalid configuration: {}", e),
            hint: None,
        })?;
        Ok(Self { ini })
    }

    /// Returns the raw value of `key` in `section`.
    ///
    /// A missing section is an error; a missing key within an existing
    /// section is `None`.
    pub fn get(&self, section: &str, key: &str) -> Result<Option<&str>> {
        let props = self.ini.section(Some(section)).ok_or_else(|| {
            log::error!("Configuration is missing section: {}", section);
            Error::config(format!("Configuration is missing section: {}", section))
        })?;
        Ok(props.get(key).map(str::trim).filter(|v| !v.is_empty()))
    }

    fn setting(&self, key: &str) -> Result<Option<&str>> {
        self.get(SETTINGS_SECTION, key)
    }

    fn required_setting(&self, key: &str) -> Result<&str> {
        self.setting(key)?.ok_or_else(|| Error::Config {
            message: format!("Required setting '{}' is missing", key),
            hint: Some(format!("Add '{} = <value>' to the [{}] section", key, SETTINGS_SECTION)),
        })
    }

    fn bool_setting(&self, key: &str, default: bool) -> Result<bool> {
        match self.setting(key)? {
            None => Ok(default),
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| Error::config(format!("Setting '{}' must be true or false, got '{}'", key, raw))),
        }
    }

    fn u64_setting(&self, key: &str, default: u64) -> Result<u64> {
        match self.setting(key)? {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::config(format!("Setting '{}' must be a whole number, got '{}'", key, raw))),
        }
    }

    /// Returns the environment a branch deploys to, if it is mapped.
    pub fn environment_for_branch(&self, branch: &str) -> Option<String> {
        self.ini
            .section(Some(BRANCHES_SECTION))
            .and_then(|props| props.get(branch))
            .map(|env| env.trim().to_string())
            .filter(|env| !env.is_empty())
    }

    /// Returns every environment named in `[branches]`, sorted and
    /// deduplicated.
    pub fn declared_environments(&self) -> Vec<String> {
        let mut envs: Vec<String> = self
            .ini
            .section(Some(BRANCHES_SECTION))
            .map(|props| props.iter().map(|(_, v)| v.trim().to_string()).collect())
            .unwrap_or_default();
        envs.retain(|e| !e.is_empty());
        envs.sort();
        envs.dedup();
        envs
    }

    /// Returns the configured policy provider, or `None` when validation is
    /// disabled.
    pub fn policy_provider(&self) -> Result<Option<PolicyProvider>> {
        match self.setting("policy_as_code_provider")? {
            None => Ok(None),
            Some(p) if p.eq_ignore_ascii_case("guard") => Ok(Some(PolicyProvider::Guard)),
            Some(other) => Err(Error::Config {
                message: format!("Unsupported policy_as_code_provider '{}'", other),
                hint: Some("Supported providers: guard".to_string()),
            }),
        }
    }

    /// Returns the settings needed to drive stack actions.
    pub fn deploy_settings(&self) -> Result<DeploySettings> {
        let timeout_minutes = self.u64_setting("stack_timeout_minutes", 0)?;
        let max_parallel = self.u64_setting("max_parallel_stacks", 1)?;
        Ok(DeploySettings {
            execution_role_name: self.required_setting("stack_execution_role_name")?.to_string(),
            check_period: Duration::from_secs(
                self.u64_setting("cf_check_period_seconds", defaults::DEFAULT_CHECK_PERIOD_SECS)?,
            ),
            stack_name_prefix: self.setting("stack_name_prefix")?.map(str::to_string),
            termination_protection: self.bool_setting("termination_protection_enabled", false)?,
            upload_bucket_name: self
                .setting("cloudformation_upload_bucket_name")?
                .map(str::to_string),
            retain_failed_resources: self.bool_setting("retain_failed_resources", false)?,
            max_parallel_stacks: usize::try_from(max_parallel.max(1)).unwrap_or(1),
            stack_timeout: (timeout_minutes > 0).then(|| Duration::from_secs(timeout_minutes * 60)),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
