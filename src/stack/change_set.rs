//! Change-set previews.
//!
//! A preview submits the stack's template and parameters as a change set,
//! waits for the service to compute it, logs the resource changes and then
//! deletes the change set again. Nothing is executed.

use log::{info, warn};

use super::lifecycle::stack_request;
use super::monitor::CancellationToken;
use super::{ActionOutcome, ExecutionSettings, StackRecord, StackServices};
use crate::cloud::{ChangeSetDescription, ChangeSetRequest, ChangeSetType, ResourceChange};
use crate::defaults::CHANGE_SET_PREFIX;
use crate::error::Result;

/// Status of a stack that only exists because of a CREATE change set.
const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// Name of the preview change set for a stack.
pub fn change_set_name(stack_name: &str) -> String {
    format!("{}-{}", CHANGE_SET_PREFIX, stack_name)
}

fn is_pending(status: &str) -> bool {
    matches!(status, "CREATE_PENDING" | "CREATE_IN_PROGRESS")
}

fn is_empty_change_set(description: &ChangeSetDescription) -> bool {
    description
        .status_reason
        .as_deref()
        .map(|r| r.contains("didn't contain changes") || r.contains("No updates are to be performed"))
        .unwrap_or(false)
}

/// Previews creating or updating the stack.
///
/// Returns `Success` when the change set was computed, including when it has
/// no changes, and `Failure` when the service could not compute it.
pub fn preview(
    record: &StackRecord,
    services: &StackServices,
    settings: &ExecutionSettings,
    cancel: &CancellationToken,
) -> Result<ActionOutcome> {
    let target = record.log_target();
    let orchestration = services.orchestration.as_ref();
    let name = change_set_name(record.stack_name());

    let existing = orchestration
        .describe_stack(record.stack_name())
        .map_err(|e| e.into_error("DescribeStacks"))?;
    let change_set_type = match existing {
        Some(stack) if stack.status != REVIEW_IN_PROGRESS => ChangeSetType::Update,
        _ => ChangeSetType::Create,
    };

    let mut stack = stack_request(record, services)?;
    stack.delete_on_failure = false;
    let request = ChangeSetRequest {
        change_set_name: name.clone(),
        change_set_type,
        stack,
    };

    info!(
        target: target,
        "Creating {} change set {} for stack {}",
        change_set_type.as_str(),
        name,
        record.stack_name()
    );
    match orchestration.create_change_set(&request) {
        Ok(()) => {}
        Err(e) if e.is_already_exists() => {
            warn!(target: target, "Change set {} already exists. Replacing it.", name);
            orchestration
                .delete_change_set(record.stack_name(), &name)
                .map_err(|e| e.into_error("DeleteChangeSet"))?;
            orchestration
                .create_change_set(&request)
                .map_err(|e| e.into_error("CreateChangeSet"))?;
        }
        Err(e) => return Err(e.into_error("CreateChangeSet")),
    }

    let deadline = cancel.with_timeout(services.clock.now(), settings.stack_timeout);
    let outcome = loop {
        if deadline.is_expired_at(services.clock.now()) {
            warn!(target: target, "Stopped waiting for change set {}", name);
            break ActionOutcome::Canceled;
        }
        let description = orchestration
            .describe_change_set(record.stack_name(), &name)
            .map_err(|e| e.into_error("DescribeChangeSet"))?;
        if is_pending(&description.status) {
            services.clock.sleep(settings.check_period);
            continue;
        }
        break report(record, &description);
    };

    clean_up(record, services, &name, change_set_type);
    Ok(outcome)
}

fn report(record: &StackRecord, description: &ChangeSetDescription) -> ActionOutcome {
    let target = record.log_target();
    if description.status == "FAILED" {
        if is_empty_change_set(description) {
            info!(target: target, "No changes for stack {}", record.stack_name());
            return ActionOutcome::Success;
        }
        warn!(
            target: target,
            "Change set for stack {} failed: {}",
            record.stack_name(),
            description.status_reason.as_deref().unwrap_or("no reason given")
        );
        return ActionOutcome::Failure;
    }

    if description.changes.is_empty() {
        info!(target: target, "No changes for stack {}", record.stack_name());
    }
    for ResourceChange {
        action,
        logical_id,
        resource_type,
    } in &description.changes
    {
        info!(target: target, "{} {} ({})", action, logical_id, resource_type);
    }
    ActionOutcome::Success
}

/// Deletes the change set, and the placeholder stack a CREATE change set
/// leaves behind. Failures only warn.
fn clean_up(record: &StackRecord, services: &StackServices, name: &str, change_set_type: ChangeSetType) {
    let target = record.log_target();
    let orchestration = services.orchestration.as_ref();
    if let Err(e) = orchestration.delete_change_set(record.stack_name(), name) {
        warn!(target: target, "Unable to delete change set {}: {}", name, e);
    }
    if change_set_type == ChangeSetType::Create {
        if let Err(e) = orchestration.delete_stack(record.stack_name(), record.role_arn(), &[]) {
            if !e.is_stack_missing(record.stack_name()) {
                warn!(target: target, "Unable to delete review stack {}: {}", record.stack_name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::StackDescription;
    use crate::layout::{EnvScope, FileKind, TemplatePath};
    use crate::stack::StackAction;
    use crate::testing::{FakeClock, FakeCloud};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const STACK: &str = "managed-app-queue";

    fn record(temp: &TempDir) -> StackRecord {
        let path = temp.path().join("deployments/eu-west-1/dev/templates/queue.yaml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "Resources: {}\n").unwrap();
        let template = TemplatePath::new("eu-west-1", EnvScope::Env("dev".into()), FileKind::Templates, "queue.yaml");
        StackRecord::prepare(temp.path(), &template, StackAction::Update, Some("dev"), &ExecutionSettings::default())
            .unwrap()
    }

    fn existing(cloud: &FakeCloud, status: &str) {
        cloud.orchestration.put_stack(StackDescription {
            stack_name: STACK.into(),
            status: status.into(),
            status_reason: None,
        });
    }

    fn run(cloud: &FakeCloud, record: &StackRecord, settings: &ExecutionSettings) -> ActionOutcome {
        let services = cloud.services(Arc::new(FakeClock::new()));
        preview(record, &services, settings, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_change_set_name() {
        assert_eq!(change_set_name("app"), "cfn-deploy-change-set-app");
    }

    #[test]
    fn test_update_preview_logs_changes() {
        testing_logger::setup();
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        existing(&cloud, "UPDATE_COMPLETE");
        cloud.orchestration.set_change_set(ChangeSetDescription {
            status: "CREATE_COMPLETE".into(),
            status_reason: None,
            changes: vec![ResourceChange {
                action: "Modify".into(),
                logical_id: "Queue".into(),
                resource_type: "AWS::SQS::Queue".into(),
            }],
        });

        assert_eq!(run(&cloud, &record, &ExecutionSettings::default()), ActionOutcome::Success);
        assert_eq!(
            cloud.orchestration.calls(),
            vec![
                format!("create_change_set:{}", STACK),
                format!("describe_change_set:{}", STACK),
                format!("delete_change_set:{}", STACK),
            ]
        );
        let request = &cloud.orchestration.requests()[0];
        assert!(!request.delete_on_failure);
        testing_logger::validate(|captured| {
            assert!(captured.iter().any(|l| l.body == "Modify Queue (AWS::SQS::Queue)"));
        });
    }

    #[test]
    fn test_create_preview_removes_review_stack() {
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        assert_eq!(run(&cloud, &record, &ExecutionSettings::default()), ActionOutcome::Success);
        assert_eq!(cloud.orchestration.calls().last().unwrap(), &format!("delete_stack:{}", STACK));
    }

    #[test]
    fn test_conflicting_change_set_is_replaced() {
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        existing(&cloud, "CREATE_COMPLETE");
        cloud.orchestration.conflict_change_set(STACK);
        assert_eq!(run(&cloud, &record, &ExecutionSettings::default()), ActionOutcome::Success);
        let calls = cloud.orchestration.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("create_change_set")).count(), 2);
        assert_eq!(calls[1], format!("delete_change_set:{}", STACK));
    }

    #[test]
    fn test_empty_change_set_is_success() {
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        existing(&cloud, "UPDATE_COMPLETE");
        cloud.orchestration.set_change_set(ChangeSetDescription {
            status: "FAILED".into(),
            status_reason: Some("The submitted information didn't contain changes.".into()),
            changes: Vec::new(),
        });
        assert_eq!(run(&cloud, &record, &ExecutionSettings::default()), ActionOutcome::Success);
    }

    #[test]
    fn test_failed_change_set_is_failure() {
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        existing(&cloud, "UPDATE_COMPLETE");
        cloud.orchestration.set_change_set(ChangeSetDescription {
            status: "FAILED".into(),
            status_reason: Some("Template format error".into()),
            changes: Vec::new(),
        });
        assert_eq!(run(&cloud, &record, &ExecutionSettings::default()), ActionOutcome::Failure);
        assert!(cloud
            .orchestration
            .calls()
            .contains(&format!("delete_change_set:{}", STACK)));
    }

    #[test]
    fn test_pending_change_set_times_out() {
        let temp = TempDir::new().unwrap();
        let record = record(&temp);
        let cloud = FakeCloud::new();
        existing(&cloud, "UPDATE_COMPLETE");
        cloud.orchestration.set_change_set(ChangeSetDescription {
            status: "CREATE_PENDING".into(),
            status_reason: None,
            changes: Vec::new(),
        });
        let settings = ExecutionSettings {
            check_period: Duration::from_secs(10),
            stack_timeout: Some(Duration::from_secs(30)),
            ..ExecutionSettings::default()
        };
        assert_eq!(run(&cloud, &record, &settings), ActionOutcome::Canceled);
        let describes = cloud
            .orchestration
            .calls()
            .iter()
            .filter(|c| c.starts_with("describe_change_set"))
            .count();
        assert_eq!(describes, 3);
    }
}
