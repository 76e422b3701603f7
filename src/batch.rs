//! # Batch Coordination
//!
//! Drives every stack of a [`PipelineScope`] through its action, in three
//! batches: create, then update, then delete. Each batch runs its `all_envs`
//! templates before the environment templates, so shared infrastructure is
//! in place before anything that depends on it.
//!
//! ## Failure semantics
//!
//! The first stack that does not succeed aborts the run: stacks of the same
//! sublist that have not started yet are skipped, and every later sublist and
//! batch is reported as `CANCELED`. An update never runs after a failed
//! create, and nothing is deleted after a failed update.
//!
//! The deployment checkpoint is only advanced when all three batches
//! succeeded.
//!
//! ## Parallelism
//!
//! With `max_parallel_stacks > 1`, the stacks of a sublist run on a `rayon`
//! pool of that size. Stacks already running when another fails are waited
//! for; stacks not yet started are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use rayon::prelude::*;

use crate::cloud::storage::TemplateUploader;
use crate::cloud::CloudProvider;
use crate::error::Result;
use crate::git::VersionControl;
use crate::layout::TemplatePath;
use crate::scope::{split_by_env, ChangeSet, PipelineScope};
use crate::stack::change_set::preview;
use crate::stack::{
    run_action, ActionOutcome, CancellationToken, Clock, ExecutionSettings, StackAction, StackRecord, StackServices,
};

/// What happened to one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackOutcome {
    pub template: TemplatePath,
    /// `None` when the stack was skipped or could not be prepared.
    pub stack_name: Option<String>,
    pub outcome: ActionOutcome,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub action: StackAction,
    pub outcome: ActionOutcome,
    pub stacks: Vec<StackOutcome>,
}

impl BatchReport {
    fn new(action: StackAction, stacks: Vec<StackOutcome>) -> Self {
        let outcome = if stacks.iter().any(|s| s.outcome == ActionOutcome::Failure) {
            ActionOutcome::Failure
        } else if stacks.iter().any(|s| s.outcome == ActionOutcome::Canceled) {
            ActionOutcome::Canceled
        } else {
            ActionOutcome::Success
        };
        Self { action, outcome, stacks }
    }

    fn canceled(action: StackAction, templates: &[TemplatePath]) -> Self {
        Self {
            action,
            outcome: ActionOutcome::Canceled,
            stacks: templates.iter().map(skipped).collect(),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeploymentReport {
    pub batches: Vec<BatchReport>,
    pub checkpoint_advanced: bool,
}

impl DeploymentReport {
    /// Outcome of the batch for `action`, if it was part of the run.
    pub fn outcome(&self, action: StackAction) -> Option<ActionOutcome> {
        self.batches.iter().find(|b| b.action == action).map(|b| b.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.batches.iter().all(|b| b.outcome.is_success())
    }

    /// Process exit code for the run.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Logs one line per batch and one per stack that did not succeed.
    pub fn log_summary(&self) {
        for batch in &self.batches {
            info!("{} batch: {}", batch.action, batch.outcome);
            for stack in batch.stacks.iter().filter(|s| !s.outcome.is_success()) {
                warn!(
                    "  {} ({}): {}",
                    stack.template,
                    stack.stack_name.as_deref().unwrap_or("-"),
                    stack.outcome
                );
            }
        }
    }
}

fn skipped(template: &TemplatePath) -> StackOutcome {
    StackOutcome {
        template: template.clone(),
        stack_name: None,
        outcome: ActionOutcome::Canceled,
    }
}

/// Runs stack actions for a scope against per-region services.
pub struct BatchCoordinator {
    repo_root: PathBuf,
    settings: ExecutionSettings,
    services: BTreeMap<String, StackServices>,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(repo_root: impl Into<PathBuf>, settings: ExecutionSettings, services: BTreeMap<String, StackServices>) -> Self {
        Self {
            repo_root: repo_root.into(),
            settings,
            services,
            max_parallel: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Connects to every region in `regions`, selecting the upload bucket of
    /// each.
    pub fn connect(
        repo_root: &Path,
        cloud: &dyn CloudProvider,
        clock: Arc<dyn Clock>,
        regions: &[String],
        upload_bucket: Option<&str>,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        let mut services = BTreeMap::new();
        for region in regions {
            let uploader = TemplateUploader::for_region(cloud.storage(region), upload_bucket, region)?;
            services.insert(
                region.clone(),
                StackServices {
                    orchestration: cloud.orchestration(region),
                    uploader,
                    clock: Arc::clone(&clock),
                },
            );
        }
        Ok(Self::new(repo_root, settings, services))
    }

    /// Runs up to `max_parallel` stacks of a sublist at once.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Token that stops waiting on every running stack when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the batches for `actions`, in order, with `operation` as the
    /// per-stack action.
    pub fn run<F>(&self, changes: &ChangeSet, environment: Option<&str>, actions: &[StackAction], operation: F) -> Result<DeploymentReport>
    where
        F: Fn(&mut StackRecord, StackAction, &StackServices, &ExecutionSettings, &CancellationToken) -> Result<ActionOutcome>
            + Sync,
    {
        let abort = AtomicBool::new(false);
        let pool = if self.max_parallel > 1 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(self.max_parallel).build()?)
        } else {
            None
        };

        let mut report = DeploymentReport::default();
        for &action in actions {
            let templates = changes.for_action(action);
            if abort.load(Ordering::SeqCst) {
                report.batches.push(BatchReport::canceled(action, templates));
                continue;
            }
            if !templates.is_empty() {
                info!("Starting {} batch with {} stack(s)", action, templates.len());
            }

            let (shared, specific) = split_by_env(templates);
            let mut stacks = Vec::with_capacity(templates.len());
            for sublist in [shared, specific] {
                if abort.load(Ordering::SeqCst) {
                    stacks.extend(sublist.iter().map(skipped));
                    continue;
                }
                let run_one = |template: &TemplatePath| self.run_one(template, action, environment, &abort, &operation);
                let outcomes: Vec<StackOutcome> = match &pool {
                    Some(pool) if sublist.len() > 1 => pool.install(|| sublist.par_iter().map(run_one).collect()),
                    _ => sublist.iter().map(run_one).collect(),
                };
                stacks.extend(outcomes);
            }

            let batch = BatchReport::new(action, stacks);
            if !batch.outcome.is_success() {
                error!("{} batch did not succeed: {}", action, batch.outcome);
                abort.store(true, Ordering::SeqCst);
            }
            report.batches.push(batch);
        }
        Ok(report)
    }

    fn run_one<F>(
        &self,
        template: &TemplatePath,
        action: StackAction,
        environment: Option<&str>,
        abort: &AtomicBool,
        operation: &F,
    ) -> StackOutcome
    where
        F: Fn(&mut StackRecord, StackAction, &StackServices, &ExecutionSettings, &CancellationToken) -> Result<ActionOutcome>
            + Sync,
    {
        let target = template.log_context();
        if abort.load(Ordering::SeqCst) {
            info!(target: target.as_str(), "Skipping {} after an earlier failure", action);
            return skipped(template);
        }

        let failed = |stack_name: Option<String>| {
            abort.store(true, Ordering::SeqCst);
            StackOutcome {
                template: template.clone(),
                stack_name,
                outcome: ActionOutcome::Failure,
            }
        };

        let Some(services) = self.services.get(template.region()) else {
            error!(target: target.as_str(), "No services connected for region {}", template.region());
            return failed(None);
        };
        let mut record = match StackRecord::prepare(&self.repo_root, template, action, environment, &self.settings) {
            Ok(record) => record,
            Err(e) => {
                error!(target: target.as_str(), "Unable to prepare stack: {}", e);
                return failed(None);
            }
        };
        let stack_name = Some(record.stack_name().to_string());
        let outcome = match operation(&mut record, action, services, &self.settings, &self.cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target: target.as_str(), "{} of stack {} failed: {}", action, record.stack_name(), e);
                return failed(stack_name);
            }
        };
        if !outcome.is_success() {
            abort.store(true, Ordering::SeqCst);
        }
        StackOutcome {
            template: template.clone(),
            stack_name,
            outcome,
        }
    }
}

/// Deploys the scope and advances the checkpoint when every batch
/// succeeded.
pub fn deploy_scope(
    scope: &PipelineScope,
    coordinator: &BatchCoordinator,
    vcs: &dyn VersionControl,
) -> Result<DeploymentReport> {
    let mut report = coordinator.run(scope.changes(), scope.environment(), &StackAction::ORDER, run_action)?;
    if report.is_success() {
        scope.advance_checkpoint(vcs)?;
        report.checkpoint_advanced = true;
    } else {
        warn!("Deployment did not fully succeed; checkpoint left at {}", scope.checkpoint().unwrap_or("(none)"));
    }
    report.log_summary();
    Ok(report)
}

/// Previews the create and update batches without executing them.
pub fn plan_scope(scope: &PipelineScope, coordinator: &BatchCoordinator) -> Result<DeploymentReport> {
    let report = coordinator.run(
        scope.changes(),
        scope.environment(),
        &[StackAction::Create, StackAction::Update],
        |record, _action, services, settings, cancel| preview(record, services, settings, cancel),
    )?;
    report.log_summary();
    Ok(report)
}
