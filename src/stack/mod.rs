//! # Stacks
//!
//! A stack is one deployable unit: a template, the name it is deployed
//! under, and its parameters. This module prepares a [`StackRecord`] for a
//! template and drives it through one action.
//!
//! - **[`lifecycle`]**: create, update and delete with the idempotency rules
//!   of the orchestration service.
//! - **[`monitor`]**: the status state machine, clock and cancellation
//!   used while waiting for a terminal status.
//! - **[`change_set`]**: previews an action without executing it.
//!
//! Every message about a stack is logged with the stack's own log target
//! (`<region>/<environment>/<template file>`), so concurrent stacks can be
//! told apart.

pub mod change_set;
pub mod lifecycle;
pub mod monitor;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::cloud::storage::TemplateUploader;
use crate::cloud::OrchestrationService;
use crate::config::DeploySettings;
use crate::defaults::{self, DEFAULT_STACK_PREFIX, STACK_CAPABILITIES};
use crate::error::Result;
use crate::layout::{EnvScope, FileKind, TemplatePath};
use crate::mappings::{MappingKind, MappingTable};
use crate::template::{create_parameter_binding, ParameterBinding, ParameterFile, TemplateDocument};

pub use lifecycle::run_action;
pub use monitor::{CancellationToken, Clock, StackMonitor, SystemClock};

/// The action taken on a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StackAction {
    Create,
    Update,
    Delete,
}

impl StackAction {
    /// Batch order: shared resources are created before they are updated,
    /// and nothing is deleted until everything else is in place.
    pub const ORDER: [StackAction; 3] = [StackAction::Create, StackAction::Update, StackAction::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            StackAction::Create => "CREATE",
            StackAction::Update => "UPDATE",
            StackAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for StackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stack action, or of a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure,
    /// Not attempted, or abandoned before reaching a terminal status.
    Canceled,
}

impl ActionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionOutcome::Success => "SUCCESS",
            ActionOutcome::Failure => "FAILURE",
            ActionOutcome::Canceled => "CANCELED",
        }
    }

    pub fn is_success(self) -> bool {
        self == ActionOutcome::Success
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every stack action of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub role_arn: Option<String>,
    pub stack_name_prefix: String,
    pub termination_protection: bool,
    pub retain_failed_resources: bool,
    pub check_period: Duration,
    pub stack_timeout: Option<Duration>,
    /// Parameter values that beat parameter files.
    pub parameter_overrides: BTreeMap<String, String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            role_arn: None,
            stack_name_prefix: DEFAULT_STACK_PREFIX.to_string(),
            termination_protection: false,
            retain_failed_resources: false,
            check_period: defaults::default_check_period(),
            stack_timeout: None,
            parameter_overrides: BTreeMap::new(),
        }
    }
}

impl ExecutionSettings {
    /// Builds the settings from the configuration file and the target account.
    pub fn from_config(settings: &DeploySettings, account_number: &str) -> Self {
        Self {
            role_arn: Some(defaults::execution_role_arn(account_number, &settings.execution_role_name)),
            stack_name_prefix: settings
                .stack_name_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_STACK_PREFIX.to_string()),
            termination_protection: settings.termination_protection,
            retain_failed_resources: settings.retain_failed_resources,
            check_period: settings.check_period,
            stack_timeout: settings.stack_timeout,
            parameter_overrides: BTreeMap::new(),
        }
    }
}

/// The remote collaborators one stack action needs.
#[derive(Clone)]
pub struct StackServices {
    pub orchestration: Arc<dyn OrchestrationService>,
    pub uploader: TemplateUploader,
    pub clock: Arc<dyn Clock>,
}

/// Default stack name: `<prefix>-<template stem>`, with characters stack
/// names do not allow replaced by `-`.
pub fn default_stack_name(prefix: &str, template: &TemplatePath) -> String {
    format!("{}-{}", prefix, template.stem()).replace(['_', '.'], "-")
}

/// Default parameter file name for a template.
///
/// Shared templates take one parameter file per environment
/// (`<stem>.<env>.json`); environment templates use `<stem>.json`.
pub fn default_parameter_file_name(template: &TemplatePath, environment: Option<&str>) -> String {
    match (template.env(), environment) {
        (EnvScope::AllEnvs, Some(env)) => format!("{}.{}.json", template.stem(), env),
        _ => format!("{}.json", template.stem()),
    }
}

/// One stack to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct StackRecord {
    template: TemplatePath,
    template_file: PathBuf,
    stack_name: String,
    parameter_file: PathBuf,
    binding: ParameterBinding,
    template_size: u64,
    role_arn: Option<String>,
    termination_protection: bool,
    log_target: String,
    status: Option<String>,
}

impl StackRecord {
    /// Prepares `template` for `action`.
    ///
    /// Creates and updates read the template and bind its parameters; a
    /// missing required parameter fails here, before anything is submitted.
    /// Deletes never read the template, which is usually gone.
    pub fn prepare(
        repo_root: &Path,
        template: &TemplatePath,
        action: StackAction,
        environment: Option<&str>,
        settings: &ExecutionSettings,
    ) -> Result<Self> {
        let log_target = template.log_context();
        let template_file = template.absolute(repo_root);

        let stack_names = MappingTable::load(
            repo_root,
            MappingKind::Templates,
            template.region(),
            template.env(),
            environment,
        )?;
        let stack_name = match stack_names.get(template.file_name()) {
            Some(name) => name.to_string(),
            None => default_stack_name(&settings.stack_name_prefix, template),
        };

        let parameter_names = MappingTable::load(
            repo_root,
            MappingKind::Parameters,
            template.region(),
            template.env(),
            environment,
        )?;
        let parameter_file_name = match parameter_names.key_for_value(template.file_name()) {
            Some(name) => name.to_string(),
            None => default_parameter_file_name(template, environment),
        };
        let parameter_file = template
            .sibling(FileKind::Parameters, &parameter_file_name)
            .absolute(repo_root);

        let (binding, template_size) = match action {
            StackAction::Delete => (ParameterBinding::default(), 0),
            StackAction::Create | StackAction::Update => {
                let document = TemplateDocument::from_file(&template_file)?;
                let file = ParameterFile::load(&parameter_file)?;
                if file.is_none() {
                    warn!(
                        target: log_target.as_str(),
                        "Parameter file {} not found. Template defaults will be used.",
                        parameter_file.display()
                    );
                }
                let binding = create_parameter_binding(&document, &settings.parameter_overrides, file.as_ref())?;
                (binding, fs::metadata(&template_file)?.len())
            }
        };

        info!(target: log_target.as_str(), "Prepared stack {} for {}", stack_name, action);
        Ok(Self {
            template: template.clone(),
            template_file,
            stack_name,
            parameter_file,
            binding,
            template_size,
            role_arn: settings.role_arn.clone(),
            termination_protection: settings.termination_protection,
            log_target,
            status: None,
        })
    }

    pub fn template(&self) -> &TemplatePath {
        &self.template
    }

    /// Absolute path of the template file.
    pub fn template_file(&self) -> &Path {
        &self.template_file
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn parameter_file(&self) -> &Path {
        &self.parameter_file
    }

    pub fn binding(&self) -> &ParameterBinding {
        &self.binding
    }

    /// Template size in bytes; zero for deletes.
    pub fn template_size(&self) -> u64 {
        self.template_size
    }

    pub fn role_arn(&self) -> Option<&str> {
        self.role_arn.as_deref()
    }

    pub fn termination_protection(&self) -> bool {
        self.termination_protection
    }

    /// Log target for messages about this stack.
    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    /// Last status observed from the service.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub(crate) fn set_status(&mut self, status: Option<String>) {
        self.status = status;
    }

    /// Capabilities acknowledged on submission.
    pub fn capabilities() -> Vec<String> {
        STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect()
    }
}
