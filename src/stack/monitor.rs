//! Waiting for a stack to reach a terminal status.
//!
//! Stack statuses collapse into three categories: in progress, success and
//! failure. [`StackMonitor`] is a small state machine fed one observed status
//! at a time; [`wait_for_completion`] drives it by polling the service on a
//! [`Clock`] until it is terminal or the [`CancellationToken`] fires.
//!
//! When an action fails, [`failed_events_since`] pages through the stack's
//! event history back to the action's start and returns the failed events.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info};
use regex::Regex;

use super::StackAction;
use crate::cloud::{OrchestrationService, ServiceResult, StackEvent};

/// Status category of a stack for a given action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    InProgress,
    Success,
    Failure,
}

/// Categorizes `status` while performing `action`.
///
/// Creates roll back by deleting the stack, so `DELETE_IN_PROGRESS` during a
/// create is already a failure.
pub fn categorize(status: &str, action: StackAction) -> StatusCategory {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "DELETE_COMPLETE" => StatusCategory::Success,
        "DELETE_IN_PROGRESS" if action == StackAction::Create => StatusCategory::Failure,
        s if s.ends_with("_FAILED") || s.contains("ROLLBACK") => StatusCategory::Failure,
        _ => StatusCategory::InProgress,
    }
}

/// Where a monitored action stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Waiting,
    Succeeded,
    Failed { status: Option<String> },
    Canceled,
}

/// State machine for one action on one stack.
#[derive(Debug, Clone)]
pub struct StackMonitor {
    action: StackAction,
    state: MonitorState,
    last_status: Option<String>,
    polls: usize,
}

impl StackMonitor {
    pub fn new(action: StackAction) -> Self {
        Self {
            action,
            state: MonitorState::Waiting,
            last_status: None,
            polls: 0,
        }
    }

    /// Advances on a polled status; `None` means the stack does not exist.
    /// Terminal states are sticky.
    pub fn observe(&mut self, status: Option<&str>) -> &MonitorState {
        if self.is_terminal() {
            return &self.state;
        }
        self.polls += 1;
        self.last_status = status.map(str::to_string);
        self.state = match status {
            None if self.action == StackAction::Delete => MonitorState::Succeeded,
            None => MonitorState::Failed { status: None },
            Some(status) => match categorize(status, self.action) {
                StatusCategory::InProgress => MonitorState::Waiting,
                StatusCategory::Success => MonitorState::Succeeded,
                StatusCategory::Failure => MonitorState::Failed {
                    status: Some(status.to_string()),
                },
            },
        };
        &self.state
    }

    /// Stops waiting. Has no effect once terminal.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.state = MonitorState::Canceled;
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != MonitorState::Waiting
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

/// Source of time for polling.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Shared cancellation flag with an optional deadline.
///
/// Clones share the flag; [`with_deadline`](Self::with_deadline) derives a
/// token that also expires at a point in time.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<DateTime<Utc>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token sharing this flag that also expires at `deadline`.
    pub fn with_deadline(&self, deadline: DateTime<Utc>) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
        }
    }

    /// A token expiring `timeout` after `now`, or a plain clone without a
    /// timeout.
    pub fn with_timeout(&self, now: DateTime<Utc>, timeout: Option<Duration>) -> Self {
        match timeout.and_then(|t| chrono::Duration::from_std(t).ok()) {
            Some(t) => self.with_deadline(now + t),
            None => self.clone(),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the flag was set.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether the flag was set or the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_cancelled() || self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

/// Polls the stack every `period` until the monitor is terminal.
pub fn wait_for_completion(
    service: &dyn OrchestrationService,
    stack_name: &str,
    monitor: &mut StackMonitor,
    clock: &dyn Clock,
    period: Duration,
    cancel: &CancellationToken,
    log_target: &str,
) -> ServiceResult<MonitorState> {
    loop {
        if cancel.is_expired_at(clock.now()) {
            monitor.cancel();
            info!(target: log_target, "Stopped waiting for stack {}", stack_name);
            return Ok(monitor.state().clone());
        }
        let description = service.describe_stack(stack_name)?;
        let status = description.as_ref().map(|d| d.status.as_str());
        let state = monitor.observe(status).clone();
        match &state {
            MonitorState::Waiting => {
                if let Some(status) = status {
                    info!(target: log_target, "Stack {} status: {}", stack_name, status);
                }
                clock.sleep(period);
            }
            _ => return Ok(state),
        }
    }
}

/// Failed events of the stack recorded at or after `since`, newest first.
///
/// Pages are fetched while a next token exists and the page reaches back no
/// further than `since`.
pub fn failed_events_since(
    service: &dyn OrchestrationService,
    stack_name: &str,
    since: DateTime<Utc>,
) -> ServiceResult<Vec<StackEvent>> {
    let mut failed = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = service.describe_stack_events(stack_name, token.as_deref())?;
        failed.extend(
            page.events
                .iter()
                .filter(|e| e.timestamp >= since && e.status.contains("FAILED"))
                .cloned(),
        );
        let older_needed = page.events.last().map(|e| e.timestamp > since).unwrap_or(false);
        match page.next_token {
            Some(next) if older_needed => token = Some(next),
            _ => break,
        }
    }
    Ok(failed)
}

/// Logs each failed event as `[<logical id>]: <reason>`.
pub fn log_failed_events(events: &[StackEvent], log_target: &str) {
    for event in events {
        error!(
            target: log_target,
            "[{}]: {}",
            event.logical_id,
            event.reason.as_deref().unwrap_or("no reason given")
        );
    }
}

/// Logical ids named in `The following resource(s) failed to delete: [A, B].`
/// reasons, sorted and deduplicated.
pub fn failed_resources(events: &[StackEvent]) -> Vec<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"The following resource\(s\) failed to delete: \[([^\]]*)\]").ok());
    let Some(pattern) = pattern.as_ref() else {
        return Vec::new();
    };
    let resources: BTreeSet<String> = events
        .iter()
        .filter_map(|e| e.reason.as_deref())
        .filter_map(|reason| pattern.captures(reason))
        .flat_map(|caps| {
            caps[1]
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();
    resources.into_iter().collect()
}
