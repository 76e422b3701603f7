//! # CloudFormation Deployment Pipeline
//!
//! This library drives a repository of CloudFormation templates, laid out by
//! region and environment, into deployed stacks. It is used by the
//! `cfn-deploy` command-line tool, which a CI pipeline runs on every push.
//!
//! ## Quick Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use cfn_deploy::template::{create_parameter_binding, Evaluator, TemplateDocument, TemplateFormat};
//!
//! let yaml = r#"
//! Parameters:
//!   Env:
//!     Type: String
//!     Default: dev
//! Resources:
//!   Bucket:
//!     Type: AWS::S3::Bucket
//!     Properties:
//!       BucketName: !Join ['-', [!Ref Env, logs]]
//! "#;
//! let mut document = TemplateDocument::parse("bucket.yaml", yaml, TemplateFormat::Yaml).unwrap();
//! let binding = create_parameter_binding(&document, &BTreeMap::new(), None).unwrap();
//! let report = Evaluator::new(&binding).resolve(&mut document);
//! assert_eq!(report.unresolved, 0);
//! assert_eq!(document.root()["Resources"]["Bucket"]["Properties"]["BucketName"], "dev-logs");
//! ```
//!
//! ## Repository Layout
//!
//! ```text
//! config
//! deployments/<region>/<all_envs|env>/templates/<template>
//! deployments/<region>/<all_envs|env>/parameters/<parameter file>.json
//! deployments/<region>/<all_envs|env>/mappings/{parameters,templates}[.<env>].json
//! ```
//!
//! ## Core Concepts
//!
//! - **Layout (`layout`, `mappings`)**: classifies paths against the
//!   deployments layout and reads the mapping files that rename stacks and
//!   redirect parameter files.
//! - **Scope (`scope`, `git`)**: turns the Git diff since the last deployed
//!   commit into lists of templates to create, update and delete.
//! - **Templates (`template`)**: parameter binding and a partial evaluator
//!   for the intrinsic functions embedded in templates.
//! - **Stacks (`stack`, `cloud`)**: one action on one stack, waiting for a
//!   terminal status, against the orchestration service.
//! - **Batches (`batch`)**: runs the three lists in order and moves the
//!   deployment checkpoint once everything succeeded.
//! - **Checks (`checks`)**: hands templates to `cfn-lint` and `cfn-guard`.
//!
//! ## Execution Flow
//!
//! 1.  **Configure**: read `config`, find the branch's environment.
//! 2.  **Scope**: diff the checkpoint tag against `HEAD` and classify changes.
//! 3.  **Run the job**: lint, validate, preview (`plan`) or deploy.
//! 4.  **Checkpoint**: after a fully successful deploy, tag `HEAD`.

pub mod batch;
pub mod checks;
pub mod cloud;
pub mod config;
pub mod defaults;
pub mod error;
pub mod git;
pub mod layout;
pub mod mappings;
pub mod scope;
pub mod stack;
pub mod template;

#[cfg(test)]
mod layout_proptest;

#[cfg(test)]
pub(crate) mod testing;
