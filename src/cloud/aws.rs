//! [`OrchestrationService`] and [`ObjectStorage`] on the AWS SDK.
//!
//! The SDK clients are asynchronous. [`AwsProvider`] owns one current-thread
//! tokio runtime and every call is driven to completion with `block_on`, so
//! the stack lifecycle and the batch coordinator stay synchronous. Several
//! rayon workers may block on the runtime at once.
//!
//! Credentials, retries and endpoints come from the SDK's default chain,
//! optionally pinned to a named profile. Rejections keep the service's error
//! code and message from the SDK error metadata.

use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::primitives::DateTime as SdkDateTime;
use aws_sdk_cloudformation::types as cfn;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::runtime::Runtime;

use super::{
    ChangeSetDescription, ChangeSetRequest, CloudProvider, EventPage, ObjectStorage, OrchestrationService,
    ResourceChange, ServiceError, ServiceResult, StackDescription, StackEvent, StackRequest, TemplateSource,
};
use crate::error::Result;

/// Code given to failures that never reached the service (no credentials,
/// no network, timeouts).
const CLIENT_ERROR_CODE: &str = "ClientError";

/// A service error from the code and message of a rejected request.
pub fn from_metadata<M: ProvideErrorMetadata + ?Sized>(metadata: &M) -> ServiceError {
    ServiceError::new(
        metadata.code().unwrap_or("Unknown"),
        metadata.message().unwrap_or_default(),
    )
}

/// Converts an SDK failure into a [`ServiceError`].
fn service_error<E, R>(err: SdkError<E, R>) -> ServiceError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: fmt::Debug,
{
    match err.as_service_error() {
        Some(rejection) => from_metadata(rejection),
        None => ServiceError::new(CLIENT_ERROR_CODE, DisplayErrorContext(&err).to_string()),
    }
}

/// Converts an SDK timestamp, dropping values chrono cannot represent.
fn to_utc(timestamp: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

/// `(TemplateBody, TemplateURL)` for a request; exactly one is set.
fn template_fields(template: &TemplateSource) -> (Option<String>, Option<String>) {
    match template {
        TemplateSource::Body(body) => (Some(body.clone()), None),
        TemplateSource::Url(url) => (None, Some(url.clone())),
    }
}

fn stack_parameters(request: &StackRequest) -> Option<Vec<cfn::Parameter>> {
    if request.parameters.is_empty() {
        return None;
    }
    Some(
        request
            .parameters
            .iter()
            .map(|(key, value)| cfn::Parameter::builder().parameter_key(key).parameter_value(value).build())
            .collect(),
    )
}

fn stack_capabilities(request: &StackRequest) -> Option<Vec<cfn::Capability>> {
    if request.capabilities.is_empty() {
        return None;
    }
    Some(request.capabilities.iter().map(|c| cfn::Capability::from(c.as_str())).collect())
}

fn stack_event(event: &cfn::StackEvent) -> Option<StackEvent> {
    Some(StackEvent {
        timestamp: to_utc(event.timestamp()?)?,
        logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: event.resource_type().unwrap_or_default().to_string(),
        status: event.resource_status().map(|s| s.as_str()).unwrap_or_default().to_string(),
        reason: event.resource_status_reason().map(str::to_string),
    })
}

fn resource_change(change: &cfn::Change) -> Option<ResourceChange> {
    let change = change.resource_change()?;
    Some(ResourceChange {
        action: change.action().map(|a| a.as_str()).unwrap_or_default().to_string(),
        logical_id: change.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: change.resource_type().unwrap_or_default().to_string(),
    })
}

/// CloudFormation client for one region.
#[derive(Debug, Clone)]
pub struct CloudFormation {
    client: aws_sdk_cloudformation::Client,
    runtime: Arc<Runtime>,
}

impl CloudFormation {
    pub fn new(config: &SdkConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(config),
            runtime,
        }
    }
}

impl OrchestrationService for CloudFormation {
    fn describe_stack(&self, stack_name: &str) -> ServiceResult<Option<StackDescription>> {
        debug!("DescribeStacks {}", stack_name);
        let result = self
            .runtime
            .block_on(self.client.describe_stacks().stack_name(stack_name).send())
            .map_err(service_error);
        match result {
            Ok(output) => Ok(output.stacks().first().map(|stack| StackDescription {
                stack_name: stack.stack_name().unwrap_or(stack_name).to_string(),
                status: stack.stack_status().map(|s| s.as_str()).unwrap_or_default().to_string(),
                status_reason: stack.stack_status_reason().map(str::to_string),
            })),
            Err(e) if e.is_stack_missing(stack_name) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn describe_stack_events(&self, stack_name: &str, next_token: Option<&str>) -> ServiceResult<EventPage> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .describe_stack_events()
                    .stack_name(stack_name)
                    .set_next_token(next_token.map(str::to_string))
                    .send(),
            )
            .map_err(service_error)?;
        Ok(EventPage {
            events: output.stack_events().iter().filter_map(stack_event).collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    fn create_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        let (body, url) = template_fields(&request.template);
        let mut call = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .set_template_body(body)
            .set_template_url(url)
            .set_parameters(stack_parameters(request))
            .set_capabilities(stack_capabilities(request))
            .set_role_arn(request.role_arn.clone())
            .enable_termination_protection(request.termination_protection);
        if request.delete_on_failure {
            call = call.on_failure(cfn::OnFailure::Delete);
        }
        self.runtime.block_on(call.send()).map_err(service_error)?;
        Ok(())
    }

    fn update_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        let (body, url) = template_fields(&request.template);
        let call = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .set_template_body(body)
            .set_template_url(url)
            .set_parameters(stack_parameters(request))
            .set_capabilities(stack_capabilities(request))
            .set_role_arn(request.role_arn.clone());
        self.runtime.block_on(call.send()).map_err(service_error)?;
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str, role_arn: Option<&str>, retain: &[String]) -> ServiceResult<()> {
        let call = self
            .client
            .delete_stack()
            .stack_name(stack_name)
            .set_role_arn(role_arn.map(str::to_string))
            .set_retain_resources((!retain.is_empty()).then(|| retain.to_vec()));
        self.runtime.block_on(call.send()).map_err(service_error)?;
        Ok(())
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> ServiceResult<()> {
        let stack = &request.stack;
        let (body, url) = template_fields(&stack.template);
        let call = self
            .client
            .create_change_set()
            .stack_name(&stack.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(cfn::ChangeSetType::from(request.change_set_type.as_str()))
            .set_template_body(body)
            .set_template_url(url)
            .set_parameters(stack_parameters(stack))
            .set_capabilities(stack_capabilities(stack))
            .set_role_arn(stack.role_arn.clone());
        self.runtime.block_on(call.send()).map_err(service_error)?;
        Ok(())
    }

    fn describe_change_set(&self, stack_name: &str, change_set_name: &str) -> ServiceResult<ChangeSetDescription> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .describe_change_set()
                    .stack_name(stack_name)
                    .change_set_name(change_set_name)
                    .send(),
            )
            .map_err(service_error)?;
        Ok(ChangeSetDescription {
            status: output.status().map(|s| s.as_str()).unwrap_or_default().to_string(),
            status_reason: output.status_reason().map(str::to_string),
            changes: output.changes().iter().filter_map(resource_change).collect(),
        })
    }

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> ServiceResult<()> {
        let call = self
            .client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set_name);
        self.runtime.block_on(call.send()).map_err(service_error)?;
        Ok(())
    }
}

/// S3 client for one region.
#[derive(Debug, Clone)]
pub struct S3 {
    client: aws_sdk_s3::Client,
    runtime: Arc<Runtime>,
}

impl S3 {
    pub fn new(config: &SdkConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            runtime,
        }
    }
}

impl ObjectStorage for S3 {
    fn list_buckets(&self) -> ServiceResult<Vec<String>> {
        let output = self
            .runtime
            .block_on(self.client.list_buckets().send())
            .map_err(service_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> ServiceResult<Option<String>> {
        debug!("PutObject s3://{}/{} from {}", bucket, key, path.display());
        let output = self.runtime.block_on(async {
            let body = ByteStream::from_path(path).await.map_err(|e| {
                ServiceError::new(
                    CLIENT_ERROR_CODE,
                    format!("Unable to read {}: {}", path.display(), e),
                )
            })?;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(service_error)
        })?;
        Ok(output.version_id().map(str::to_string))
    }
}

/// [`CloudProvider`] handing out SDK clients that share one runtime.
#[derive(Debug, Clone)]
pub struct AwsProvider {
    runtime: Arc<Runtime>,
    profile: Option<String>,
}

impl AwsProvider {
    /// Starts the runtime. `profile` pins the credential profile; otherwise
    /// the SDK's default chain applies.
    pub fn new(profile: Option<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            profile,
        })
    }

    fn sdk_config(&self, region: &str) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        self.runtime.block_on(loader.load())
    }
}

impl CloudProvider for AwsProvider {
    fn orchestration(&self, region: &str) -> Arc<dyn OrchestrationService> {
        Arc::new(CloudFormation::new(&self.sdk_config(region), self.runtime.clone()))
    }

    fn storage(&self, region: &str) -> Arc<dyn ObjectStorage> {
        Arc::new(S3::new(&self.sdk_config(region), self.runtime.clone()))
    }
}
