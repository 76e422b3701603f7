//! In-memory fakes of the remote collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::cloud::storage::TemplateUploader;
use crate::cloud::{
    ChangeSetDescription, ChangeSetRequest, CloudProvider, EventPage, ObjectStorage, OrchestrationService,
    ServiceError, ServiceResult, StackDescription, StackRequest,
};
use crate::error::Result;
use crate::git::{FileChange, VersionControl};
use crate::stack::{monitor::Clock, StackServices};

/// A clock whose sleeps advance time instantly.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<usize>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
            sleeps: Mutex::new(0),
        }
    }

    pub fn sleeps(&self) -> usize {
        *self.sleeps.lock().unwrap()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
        *self.sleeps.lock().unwrap() += 1;
    }
}

#[derive(Debug, Default)]
struct FakeStack {
    current: Option<String>,
    upcoming: VecDeque<Option<String>>,
}

impl FakeStack {
    fn exists(&self) -> bool {
        self.current.is_some() || matches!(self.upcoming.front(), Some(Some(_)))
    }

    fn script(&mut self, statuses: &[Option<&str>]) {
        self.upcoming = statuses.iter().map(|s| s.map(str::to_string)).collect();
    }
}

#[derive(Debug, Default)]
struct Inner {
    stacks: BTreeMap<String, FakeStack>,
    failing: BTreeSet<String>,
    unchanged: BTreeSet<String>,
    errors: BTreeMap<String, ServiceError>,
    events: BTreeMap<String, Vec<EventPage>>,
    served: BTreeMap<String, usize>,
    change_set: Option<ChangeSetDescription>,
    change_set_conflicts: BTreeSet<String>,
    requests: Vec<StackRequest>,
    calls: Vec<String>,
}

/// An orchestration service that simulates stack status transitions.
///
/// Every accepted action scripts an in-progress status followed by the
/// terminal one, so a poll loop sees at least one transition.
#[derive(Debug, Default)]
pub struct FakeOrchestration {
    inner: Mutex<Inner>,
}

impl FakeOrchestration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the statuses `describe_stack` returns, one per call.
    pub fn script_statuses(&self, stack: &str, statuses: &[&str]) {
        let scripted: Vec<Option<&str>> = statuses.iter().map(|s| Some(*s)).collect();
        self.inner.lock().unwrap().stacks.entry(stack.to_string()).or_default().script(&scripted);
    }

    /// Adds an existing stack with a fixed status.
    pub fn put_stack(&self, description: StackDescription) {
        let mut inner = self.inner.lock().unwrap();
        let stack = inner.stacks.entry(description.stack_name).or_default();
        stack.current = Some(description.status);
        stack.upcoming.clear();
    }

    /// The next action on `stack` ends in a failed status.
    pub fn fail_next(&self, stack: &str) {
        self.inner.lock().unwrap().failing.insert(stack.to_string());
    }

    /// Updates of `stack` report that there is nothing to change.
    pub fn unchanged(&self, stack: &str) {
        self.inner.lock().unwrap().unchanged.insert(stack.to_string());
    }

    /// The next create/update/delete call on `stack` is rejected.
    pub fn reject_next(&self, stack: &str, error: ServiceError) {
        self.inner.lock().unwrap().errors.insert(stack.to_string(), error);
    }

    pub fn push_event_page(&self, stack: &str, page: EventPage) {
        self.inner.lock().unwrap().events.entry(stack.to_string()).or_default().push(page);
    }

    pub fn event_pages_served(&self, stack: &str) -> usize {
        self.inner.lock().unwrap().served.get(stack).copied().unwrap_or(0)
    }

    /// What `describe_change_set` returns.
    pub fn set_change_set(&self, description: ChangeSetDescription) {
        self.inner.lock().unwrap().change_set = Some(description);
    }

    /// The first change set created for `stack` conflicts with an old one.
    pub fn conflict_change_set(&self, stack: &str) {
        self.inner.lock().unwrap().change_set_conflicts.insert(stack.to_string());
    }

    /// Calls made, as `operation:stack` strings.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Stack requests received by create, update and change-set calls.
    pub fn requests(&self) -> Vec<StackRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    fn accept(&self, operation: &str, request: Option<&StackRequest>, stack: &str) -> ServiceResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("{}:{}", operation, stack));
        if let Some(request) = request {
            inner.requests.push(request.clone());
        }
        match inner.errors.remove(stack) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl OrchestrationService for FakeOrchestration {
    fn describe_stack(&self, stack_name: &str) -> ServiceResult<Option<StackDescription>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(stack) = inner.stacks.get_mut(stack_name) else {
            return Ok(None);
        };
        if let Some(next) = stack.upcoming.pop_front() {
            stack.current = next;
        }
        Ok(stack.current.clone().map(|status| StackDescription {
            stack_name: stack_name.to_string(),
            status,
            status_reason: None,
        }))
    }

    fn describe_stack_events(&self, stack_name: &str, _next_token: Option<&str>) -> ServiceResult<EventPage> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.served.get(stack_name).copied().unwrap_or(0);
        let page = inner
            .events
            .get(stack_name)
            .and_then(|pages| pages.get(index))
            .cloned()
            .unwrap_or_default();
        inner.served.insert(stack_name.to_string(), index + 1);
        Ok(page)
    }

    fn create_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        self.accept("create_stack", Some(request), &request.stack_name)?;
        let mut inner = self.inner.lock().unwrap();
        let fail = inner.failing.remove(&request.stack_name);
        let stack = inner.stacks.entry(request.stack_name.clone()).or_default();
        if stack.exists() {
            return Err(ServiceError::new(
                "AlreadyExistsException",
                format!("Stack [{}] already exists", request.stack_name),
            ));
        }
        let terminal = if fail { "ROLLBACK_COMPLETE" } else { "CREATE_COMPLETE" };
        stack.script(&[Some("CREATE_IN_PROGRESS"), Some(terminal)]);
        Ok(())
    }

    fn update_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        self.accept("update_stack", Some(request), &request.stack_name)?;
        let mut inner = self.inner.lock().unwrap();
        let name = request.stack_name.clone();
        if !inner.stacks.get(&name).map(FakeStack::exists).unwrap_or(false) {
            return Err(ServiceError::new(
                "ValidationError",
                format!("Stack [{}] does not exist", name),
            ));
        }
        if inner.unchanged.contains(&name) {
            return Err(ServiceError::new("ValidationError", "No updates are to be performed."));
        }
        let fail = inner.failing.remove(&name);
        let terminal = if fail { "UPDATE_ROLLBACK_COMPLETE" } else { "UPDATE_COMPLETE" };
        if let Some(stack) = inner.stacks.get_mut(&name) {
            stack.script(&[Some("UPDATE_IN_PROGRESS"), Some(terminal)]);
        }
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str, _role_arn: Option<&str>, retain: &[String]) -> ServiceResult<()> {
        let operation = if retain.is_empty() {
            "delete_stack".to_string()
        } else {
            format!("delete_stack[retain={}]", retain.join(","))
        };
        self.accept(&operation, None, stack_name)?;
        let mut inner = self.inner.lock().unwrap();
        let fail = inner.failing.remove(stack_name);
        if let Some(stack) = inner.stacks.get_mut(stack_name) {
            if fail {
                stack.script(&[Some("DELETE_IN_PROGRESS"), Some("DELETE_FAILED")]);
            } else {
                stack.script(&[Some("DELETE_IN_PROGRESS"), None]);
            }
        }
        Ok(())
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> ServiceResult<()> {
        self.accept("create_change_set", Some(&request.stack), &request.stack.stack_name)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.change_set_conflicts.remove(&request.stack.stack_name) {
            return Err(ServiceError::new(
                "AlreadyExistsException",
                format!("ChangeSet {} already exists", request.change_set_name),
            ));
        }
        Ok(())
    }

    fn describe_change_set(&self, stack_name: &str, _change_set_name: &str) -> ServiceResult<ChangeSetDescription> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("describe_change_set:{}", stack_name));
        Ok(inner.change_set.clone().unwrap_or(ChangeSetDescription {
            status: "CREATE_COMPLETE".to_string(),
            status_reason: None,
            changes: Vec::new(),
        }))
    }

    fn delete_change_set(&self, stack_name: &str, _change_set_name: &str) -> ServiceResult<()> {
        self.accept("delete_change_set", None, stack_name)
    }
}

/// Object storage holding a fixed bucket list and recording uploads.
#[derive(Debug, Default)]
pub struct FakeStorage {
    buckets: Vec<String>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl FakeStorage {
    pub fn new(buckets: &[&str]) -> Self {
        Self {
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// `(bucket, key)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

impl ObjectStorage for FakeStorage {
    fn list_buckets(&self) -> ServiceResult<Vec<String>> {
        Ok(self.buckets.clone())
    }

    fn upload_file(&self, bucket: &str, key: &str, _path: &Path) -> ServiceResult<Option<String>> {
        if !self.buckets.iter().any(|b| b == bucket) {
            return Err(ServiceError::new("NoSuchBucket", format!("{} does not exist", bucket)));
        }
        self.uploads.lock().unwrap().push((bucket.to_string(), key.to_string()));
        Ok(Some("v1".to_string()))
    }
}

/// A provider returning the same fakes for every region.
pub struct FakeCloud {
    pub orchestration: Arc<FakeOrchestration>,
    pub storage: Arc<FakeStorage>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            orchestration: Arc::new(FakeOrchestration::new()),
            storage: Arc::new(FakeStorage::new(&["cf-templates-test-us-east-1"])),
        }
    }

    /// Services for a stack action using `clock`.
    pub fn services(&self, clock: Arc<dyn Clock>) -> StackServices {
        StackServices {
            orchestration: self.orchestration.clone(),
            uploader: TemplateUploader::new(self.storage.clone(), Some("cf-templates-test-us-east-1".to_string())),
            clock,
        }
    }
}

impl CloudProvider for FakeCloud {
    fn orchestration(&self, _region: &str) -> Arc<dyn OrchestrationService> {
        self.orchestration.clone()
    }

    fn storage(&self, _region: &str) -> Arc<dyn ObjectStorage> {
        self.storage.clone()
    }
}

/// Version control with in-memory tags.
#[derive(Debug, Default)]
pub struct FakeVersionControl {
    pub head: String,
    pub changes: Vec<FileChange>,
    tags: Mutex<BTreeMap<String, String>>,
    remote_tags: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeVersionControl {
    pub fn new(head: &str, changes: Vec<FileChange>) -> Self {
        Self {
            head: head.to_string(),
            changes,
            ..Self::default()
        }
    }

    /// A tag only known to the remote until tags are fetched.
    pub fn with_remote_tag(self, name: &str, commit: &str) -> Self {
        self.remote_tags.lock().unwrap().insert(name.to_string(), commit.to_string());
        self
    }

    pub fn with_local_tag(self, name: &str, commit: &str) -> Self {
        self.tags.lock().unwrap().insert(name.to_string(), commit.to_string());
        self.remote_tags.lock().unwrap().insert(name.to_string(), commit.to_string());
        self
    }

    pub fn local_tag(&self, name: &str) -> Option<String> {
        self.tags.lock().unwrap().get(name).cloned()
    }

    pub fn remote_tag(&self, name: &str) -> Option<String> {
        self.remote_tags.lock().unwrap().get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl VersionControl for FakeVersionControl {
    fn head_commit(&self) -> Result<String> {
        Ok(self.head.clone())
    }

    fn diff(&self, old_ref: &str, new_ref: &str) -> Result<Vec<FileChange>> {
        self.record(format!("diff {}..{}", old_ref, new_ref));
        Ok(self.changes.clone())
    }

    fn resolve_tag(&self, name: &str) -> Result<Option<String>> {
        Ok(self.local_tag(name))
    }

    fn fetch_tags(&self) -> Result<()> {
        self.record("fetch".to_string());
        let remote = self.remote_tags.lock().unwrap().clone();
        self.tags.lock().unwrap().extend(remote);
        Ok(())
    }

    fn create_tag(&self, name: &str, commit: &str) -> Result<()> {
        self.record(format!("tag {} {}", name, commit));
        self.tags.lock().unwrap().insert(name.to_string(), commit.to_string());
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.record(format!("delete {}", name));
        self.tags.lock().unwrap().remove(name);
        Ok(())
    }

    fn push_tag(&self, name: &str) -> Result<()> {
        self.record(format!("push {}", name));
        if let Some(commit) = self.local_tag(name) {
            self.remote_tags.lock().unwrap().insert(name.to_string(), commit);
        }
        Ok(())
    }

    fn push_tag_deletion(&self, name: &str) -> Result<()> {
        self.record(format!("push :{}", name));
        self.remote_tags.lock().unwrap().remove(name);
        Ok(())
    }
}
