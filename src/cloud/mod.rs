//! # Cloud Services
//!
//! The orchestration service (CloudFormation) and object storage (S3) are
//! reached through two traits, [`OrchestrationService`] and
//! [`ObjectStorage`]. The stack lifecycle and batch coordinator only see the
//! traits, so tests substitute in-memory fakes.
//!
//! [`aws::AwsProvider`] hands out AWS SDK clients for both, which pick up
//! credentials the same way any other AWS tool does (environment, profiles,
//! instance roles).
//!
//! Service failures are reported as [`ServiceError`], keeping the service's
//! error code so idempotent conditions (already exists, nothing to update,
//! does not exist) can be recognised by the caller.

pub mod aws;
pub mod storage;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// An error reported by a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The stack (or change set) being created already exists.
    pub fn is_already_exists(&self) -> bool {
        self.code == "AlreadyExistsException"
    }

    /// An update was requested with nothing to change.
    pub fn is_no_updates(&self) -> bool {
        self.message.contains("No updates are to be performed")
    }

    /// The service reports that `stack_name` itself does not exist.
    ///
    /// Only the two validation messages naming the stack count; any other
    /// "does not exist" (a template URL, an S3 key) is a real rejection.
    pub fn is_stack_missing(&self, stack_name: &str) -> bool {
        if self.code != "ValidationError" {
            return false;
        }
        let message = self.message.trim().trim_end_matches('.');
        message == format!("Stack [{}] does not exist", stack_name)
            || message == format!("Stack with id {} does not exist", stack_name)
    }

    /// Converts into the crate error, naming the failed operation.
    pub fn into_error(self, operation: &str) -> Error {
        Error::Service {
            operation: operation.to_string(),
            code: self.code,
            message: self.message,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// How a template is handed to the orchestration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// The raw template text.
    Body(String),
    /// An object-storage URL the service fetches the template from.
    Url(String),
}

/// Everything needed to create or update a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<(String, String)>,
    pub role_arn: Option<String>,
    pub capabilities: Vec<String>,
    /// Only honoured on create.
    pub termination_protection: bool,
    /// Roll back a failed create by deleting the stack.
    pub delete_on_failure: bool,
}

/// Current state of a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_name: String,
    pub status: String,
    pub status_reason: Option<String>,
}

/// One entry of a stack's event history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

/// One page of stack events, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<StackEvent>,
    pub next_token: Option<String>,
}

/// Whether a change set previews a new stack or changes to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetType {
    Create,
    Update,
}

impl ChangeSetType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSetType::Create => "CREATE",
            ChangeSetType::Update => "UPDATE",
        }
    }
}

/// A request to preview a stack change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub stack: StackRequest,
}

/// A resource the change set would touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChange {
    pub action: String,
    pub logical_id: String,
    pub resource_type: String,
}

/// State of a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub status: String,
    pub status_reason: Option<String>,
    pub changes: Vec<ResourceChange>,
}

/// Trait for the stack orchestration service - allows mocking in tests
pub trait OrchestrationService: Send + Sync {
    /// The stack's current state, or `None` if it does not exist.
    fn describe_stack(&self, stack_name: &str) -> ServiceResult<Option<StackDescription>>;

    /// One page of the stack's events; pass the previous page's token to
    /// continue.
    fn describe_stack_events(&self, stack_name: &str, next_token: Option<&str>) -> ServiceResult<EventPage>;

    fn create_stack(&self, request: &StackRequest) -> ServiceResult<()>;

    fn update_stack(&self, request: &StackRequest) -> ServiceResult<()>;

    /// Deletes the stack, keeping the logical ids in `retain`.
    fn delete_stack(&self, stack_name: &str, role_arn: Option<&str>, retain: &[String]) -> ServiceResult<()>;

    fn create_change_set(&self, request: &ChangeSetRequest) -> ServiceResult<()>;

    fn describe_change_set(&self, stack_name: &str, change_set_name: &str) -> ServiceResult<ChangeSetDescription>;

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> ServiceResult<()>;
}

/// Trait for object storage - allows mocking in tests
pub trait ObjectStorage: Send + Sync {
    /// Names of all buckets in the account.
    fn list_buckets(&self) -> ServiceResult<Vec<String>>;

    /// Uploads `path` as `key`, returning the object version id when the
    /// bucket is versioned.
    fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> ServiceResult<Option<String>>;
}

/// Hands out service clients for a region.
pub trait CloudProvider: Send + Sync {
    fn orchestration(&self, region: &str) -> Arc<dyn OrchestrationService>;

    fn storage(&self, region: &str) -> Arc<dyn ObjectStorage>;
}
