//! # Static Checks
//!
//! The `lint` and `validate` jobs hand the templates in scope to external
//! tools and report the tool's exit code as the job result.
//!
//! - **lint**: `cfn-lint` over the create and update templates, checked
//!   against the regions they deploy to.
//! - **validate**: policy as code. Templates are first resolved with the
//!   template evaluator (parameters bound, intrinsics evaluated) and written
//!   as JSON under `.cfn-deploy/rendered/`, then checked with `cfn-guard`
//!   against the rules in `rules/cfn-guard`.
//!
//! The tools are started through [`ToolRunner`] so tests can record the
//! invocations instead of requiring the tools to be installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};

use crate::config::PolicyProvider;
use crate::defaults;
use crate::error::{Error, Result};
use crate::scope::PipelineScope;
use crate::stack::{ExecutionSettings, StackAction, StackRecord};
use crate::template::{EvaluationStrategy, Evaluator, TemplateDocument};

pub const LINT_TOOL: &str = "cfn-lint";
pub const GUARD_TOOL: &str = "cfn-guard";

/// Trait for running external tools - allows mocking in tests
pub trait ToolRunner: Send + Sync {
    /// Runs `program` with `args` in `dir` and returns its exit code.
    fn run(&self, program: &str, args: &[String], dir: &Path) -> Result<i32>;
}

/// Runs tools found on `PATH`, inheriting stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run(&self, program: &str, args: &[String], dir: &Path) -> Result<i32> {
        let status = Command::new(program)
            .args(args)
            .current_dir(dir)
            .status()
            .map_err(|e| Error::Tool {
                tool: program.to_string(),
                message: e.to_string(),
            })?;
        // A tool terminated by a signal counts as exit code 1.
        Ok(status.code().unwrap_or(1))
    }
}

/// Arguments for `cfn-lint` over `templates` in `regions`.
pub fn lint_args(regions: &[String], templates: &[PathBuf]) -> Vec<String> {
    let mut args: Vec<String> = ["-I", "--non-zero-exit-code", "error", "-r"]
        .iter()
        .map(|a| a.to_string())
        .collect();
    args.extend(regions.iter().cloned());
    args.push("-t".to_string());
    args.extend(templates.iter().map(|t| t.display().to_string()));
    args
}

/// Lints the create and update templates of the scope.
pub fn lint(scope: &PipelineScope, repo_root: &Path, tools: &dyn ToolRunner) -> Result<i32> {
    let templates: Vec<PathBuf> = scope.changes().deployable().map(|t| t.path().to_path_buf()).collect();
    if templates.is_empty() {
        info!("No templates to lint");
        return Ok(0);
    }
    let mut regions: Vec<String> = scope.changes().deployable().map(|t| t.region().to_string()).collect();
    regions.sort();
    regions.dedup();

    info!("Linting {} template(s) in {}", templates.len(), regions.join(", "));
    let code = tools.run(LINT_TOOL, &lint_args(&regions, &templates), repo_root)?;
    if code != 0 {
        warn!("{} exited with {}", LINT_TOOL, code);
    }
    Ok(code)
}

/// Resolves every create and update template and writes it as JSON to
/// `<rendered dir>/<region>/<env>/<stem>.json`. Returns the written files.
pub fn render_templates(
    scope: &PipelineScope,
    repo_root: &Path,
    settings: &ExecutionSettings,
    strategy: EvaluationStrategy,
) -> Result<Vec<PathBuf>> {
    let out_dir = defaults::rendered_dir(repo_root);
    let mut rendered = Vec::new();
    for template in scope.changes().deployable() {
        let record = StackRecord::prepare(repo_root, template, StackAction::Update, scope.environment(), settings)?;
        let mut document = TemplateDocument::from_file(record.template_file())?;
        let report = Evaluator::new(record.binding()).with_strategy(strategy).resolve(&mut document);
        if report.unresolved > 0 {
            warn!(
                target: record.log_target(),
                "{} intrinsic function(s) could not be resolved",
                report.unresolved
            );
        }

        let path = out_dir
            .join(template.region())
            .join(template.env().as_str())
            .join(format!("{}.json", template.stem()));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, document.to_json_pretty()?)?;
        info!(target: record.log_target(), "Rendered to {}", path.display());
        rendered.push(path);
    }
    Ok(rendered)
}

/// Arguments for `cfn-guard` over the rendered `files`.
pub fn guard_args(rules_dir: &Path, files: &[PathBuf]) -> Vec<String> {
    let mut args = vec![
        "validate".to_string(),
        "-r".to_string(),
        rules_dir.display().to_string(),
        "-d".to_string(),
    ];
    args.extend(files.iter().map(|f| f.display().to_string()));
    args
}

/// Checks the scope against the policy rules of `provider`.
pub fn validate(
    scope: &PipelineScope,
    repo_root: &Path,
    provider: Option<PolicyProvider>,
    settings: &ExecutionSettings,
    tools: &dyn ToolRunner,
) -> Result<i32> {
    let Some(PolicyProvider::Guard) = provider else {
        info!("No policy_as_code_provider configured; skipping validation");
        return Ok(0);
    };
    let files = render_templates(scope, repo_root, settings, EvaluationStrategy::default())?;
    if files.is_empty() {
        info!("No templates to validate");
        return Ok(0);
    }
    let rules = defaults::guard_rules_dir(repo_root);
    info!("Validating {} template(s) against {}", files.len(), rules.display());
    let code = tools.run(GUARD_TOOL, &guard_args(&rules, &files), repo_root)?;
    if code != 0 {
        warn!("{} exited with {}", GUARD_TOOL, code);
    }
    Ok(code)
}
