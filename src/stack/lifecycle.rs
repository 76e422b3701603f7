//! One action on one stack.
//!
//! Actions are idempotent the way the pipeline needs them to be:
//!
//! - **Create**: a stack that already exists is a success.
//! - **Update**: nothing to update is a success; a stack that does not exist
//!   is created instead.
//! - **Delete**: a stack that does not exist is a success. With
//!   `retain_failed_resources`, a stack already in `DELETE_FAILED` is deleted
//!   keeping the resources its last attempt could not delete, and a delete
//!   that fails now is retried once the same way.
//!
//! After the request is accepted the stack is polled until its status is
//! terminal. A failure replays the stack events recorded since the action
//! started and logs the failed resources.

use std::fs;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use super::monitor::{self, CancellationToken, MonitorState, StackMonitor};
use super::{ActionOutcome, ExecutionSettings, StackAction, StackRecord, StackServices};
use crate::cloud::{StackEvent, StackRequest, TemplateSource};
use crate::defaults::MAX_INLINE_TEMPLATE_BYTES;
use crate::error::Result;

/// Runs `action` on the stack and waits for its outcome.
///
/// Rejections other than the idempotent ones are returned as errors.
pub fn run_action(
    record: &mut StackRecord,
    action: StackAction,
    services: &StackServices,
    settings: &ExecutionSettings,
    cancel: &CancellationToken,
) -> Result<ActionOutcome> {
    let started = services.clock.now();
    let cancel = cancel.with_timeout(started, settings.stack_timeout);
    let run = ActionRun {
        services,
        settings,
        cancel: &cancel,
        started,
    };
    info!(target: record.log_target(), "Starting {} of stack {}", action, record.stack_name());
    match action {
        StackAction::Create => run.create(record),
        StackAction::Update => run.update(record),
        StackAction::Delete => run.delete(record),
    }
}

/// How the template reaches the service: inline when small enough,
/// otherwise uploaded and referenced by URL.
pub fn template_source(record: &StackRecord, services: &StackServices) -> Result<TemplateSource> {
    let size = record.template_size();
    if size > 0 && size <= MAX_INLINE_TEMPLATE_BYTES {
        Ok(TemplateSource::Body(fs::read_to_string(record.template_file())?))
    } else {
        info!(
            target: record.log_target(),
            "Template is {} bytes; uploading it for submission by URL",
            size
        );
        Ok(TemplateSource::Url(services.uploader.upload(record.template_file())?))
    }
}

/// The create/update request for a prepared stack.
pub fn stack_request(record: &StackRecord, services: &StackServices) -> Result<StackRequest> {
    Ok(StackRequest {
        stack_name: record.stack_name().to_string(),
        template: template_source(record, services)?,
        parameters: record.binding().supplied(),
        role_arn: record.role_arn().map(str::to_string),
        capabilities: StackRecord::capabilities(),
        termination_protection: record.termination_protection(),
        delete_on_failure: true,
    })
}

struct ActionRun<'a> {
    services: &'a StackServices,
    settings: &'a ExecutionSettings,
    cancel: &'a CancellationToken,
    started: DateTime<Utc>,
}

impl ActionRun<'_> {
    fn create(&self, record: &mut StackRecord) -> Result<ActionOutcome> {
        let request = stack_request(record, self.services)?;
        match self.services.orchestration.create_stack(&request) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                info!(target: record.log_target(), "Stack {} already exists.", record.stack_name());
                return Ok(ActionOutcome::Success);
            }
            Err(e) => return Err(e.into_error("CreateStack")),
        }
        self.await_terminal(record, StackAction::Create).map(|(outcome, _)| outcome)
    }

    fn update(&self, record: &mut StackRecord) -> Result<ActionOutcome> {
        let request = stack_request(record, self.services)?;
        match self.services.orchestration.update_stack(&request) {
            Ok(()) => {}
            Err(e) if e.is_no_updates() => {
                info!(target: record.log_target(), "No updates to perform on stack {}.", record.stack_name());
                return Ok(ActionOutcome::Success);
            }
            Err(e) if e.is_stack_missing(record.stack_name()) => {
                info!(
                    target: record.log_target(),
                    "Stack {} does not exist. Creating it instead.",
                    record.stack_name()
                );
                return self.create(record);
            }
            Err(e) => return Err(e.into_error("UpdateStack")),
        }
        self.await_terminal(record, StackAction::Update).map(|(outcome, _)| outcome)
    }

    fn delete(&self, record: &mut StackRecord) -> Result<ActionOutcome> {
        let orchestration = &self.services.orchestration;
        let existing = orchestration
            .describe_stack(record.stack_name())
            .map_err(|e| e.into_error("DescribeStacks"))?;
        let Some(existing) = existing else {
            info!(target: record.log_target(), "Stack {} is already deleted.", record.stack_name());
            return Ok(ActionOutcome::Success);
        };

        let retain_failed = self.settings.retain_failed_resources;
        let mut retain = Vec::new();
        if retain_failed && existing.status == "DELETE_FAILED" {
            info!(
                target: record.log_target(),
                "Gathering failed resources from the previous deletion attempt of stack {}",
                record.stack_name()
            );
            retain = self.previously_failed_resources(record)?;
            if !retain.is_empty() {
                info!(
                    target: record.log_target(),
                    "Deleting stack {} while retaining [{}]",
                    record.stack_name(),
                    retain.join(", ")
                );
            }
        }

        if !self.request_delete(record, &retain)? {
            return Ok(ActionOutcome::Success);
        }
        let (outcome, events) = self.await_terminal(record, StackAction::Delete)?;
        if outcome != ActionOutcome::Failure || !retain_failed || record.status() != Some("DELETE_FAILED") {
            return Ok(outcome);
        }

        let retry = monitor::failed_resources(&events);
        if retry.is_empty() || retry == retain {
            return Ok(outcome);
        }
        warn!(
            target: record.log_target(),
            "Retrying delete of stack {} retaining [{}]",
            record.stack_name(),
            retry.join(", ")
        );
        if !self.request_delete(record, &retry)? {
            return Ok(ActionOutcome::Success);
        }
        self.await_terminal(record, StackAction::Delete).map(|(outcome, _)| outcome)
    }

    /// Resources named as undeletable in the stack's most recent events.
    fn previously_failed_resources(&self, record: &StackRecord) -> Result<Vec<String>> {
        let page = self
            .services
            .orchestration
            .describe_stack_events(record.stack_name(), None)
            .map_err(|e| e.into_error("DescribeStackEvents"))?;
        Ok(monitor::failed_resources(&page.events))
    }

    /// Sends the delete request. Returns false if the stack vanished.
    fn request_delete(&self, record: &StackRecord, retain: &[String]) -> Result<bool> {
        match self
            .services
            .orchestration
            .delete_stack(record.stack_name(), record.role_arn(), retain)
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_stack_missing(record.stack_name()) => {
                info!(target: record.log_target(), "Stack {} is already deleted.", record.stack_name());
                Ok(false)
            }
            Err(e) => Err(e.into_error("DeleteStack")),
        }
    }

    fn await_terminal(&self, record: &mut StackRecord, action: StackAction) -> Result<(ActionOutcome, Vec<StackEvent>)> {
        let orchestration = self.services.orchestration.as_ref();
        let mut stack_monitor = StackMonitor::new(action);
        let state = monitor::wait_for_completion(
            orchestration,
            record.stack_name(),
            &mut stack_monitor,
            self.services.clock.as_ref(),
            self.settings.check_period,
            self.cancel,
            record.log_target(),
        )
        .map_err(|e| e.into_error("DescribeStacks"))?;
        record.set_status(stack_monitor.last_status().map(str::to_string));

        match state {
            MonitorState::Succeeded => {
                info!(target: record.log_target(), "{} of stack {} complete.", action, record.stack_name());
                Ok((ActionOutcome::Success, Vec::new()))
            }
            MonitorState::Failed { status } => {
                error!(
                    target: record.log_target(),
                    "{} of stack {} failed with status {}",
                    action,
                    record.stack_name(),
                    status.as_deref().unwrap_or("STACK_NOT_FOUND")
                );
                if status.is_none() {
                    return Ok((ActionOutcome::Failure, Vec::new()));
                }
                match monitor::failed_events_since(orchestration, record.stack_name(), self.started) {
                    Ok(events) => {
                        monitor::log_failed_events(&events, record.log_target());
                        Ok((ActionOutcome::Failure, events))
                    }
                    Err(e) => {
                        warn!(target: record.log_target(), "Unable to read stack events: {}", e);
                        Ok((ActionOutcome::Failure, Vec::new()))
                    }
                }
            }
            MonitorState::Waiting | MonitorState::Canceled => {
                warn!(
                    target: record.log_target(),
                    "{} of stack {} was cancelled before completing",
                    action,
                    record.stack_name()
                );
                Ok((ActionOutcome::Canceled, Vec::new()))
            }
        }
    }
}
