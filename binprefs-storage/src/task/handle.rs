//! Completion handles for queued tasks.

use binprefs_core::{PrefsResult, TaskError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Clone)]
enum TaskStatus {
    Queued,
    Running,
    Finished(PrefsResult<()>),
}

/// Shared completion state between a queued job and its handles.
#[derive(Debug)]
pub(crate) struct TaskState {
    name: String,
    worker: Option<ThreadId>,
    status: Mutex<TaskStatus>,
    done: Condvar,
}

impl TaskState {
    pub(crate) fn new(name: impl Into<String>, worker: Option<ThreadId>) -> Self {
        Self {
            name: name.into(),
            worker,
            status: Mutex::new(TaskStatus::Queued),
            done: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Move from queued to running. False if the task was cancelled.
    pub(crate) fn try_start(&self) -> bool {
        let mut status = self.status.lock();
        match *status {
            TaskStatus::Queued => {
                *status = TaskStatus::Running;
                true
            }
            TaskStatus::Running | TaskStatus::Finished(_) => false,
        }
    }

    pub(crate) fn finish(&self, result: PrefsResult<()>) {
        let mut status = self.status.lock();
        if !matches!(*status, TaskStatus::Finished(_)) {
            *status = TaskStatus::Finished(result);
        }
        self.done.notify_all();
    }

    fn on_worker_thread(&self) -> bool {
        self.worker == Some(thread::current().id())
    }
}

/// Handle to a task submitted to a store executor.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub(crate) fn new(state: Arc<TaskState>) -> Self {
        Self { state }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Block until the task has finished and return its outcome.
    ///
    /// Waiting from the executor's own thread on a task that has not
    /// finished would never return, so it fails immediately instead.
    pub fn wait(&self) -> PrefsResult<()> {
        let mut status = self.state.status.lock();
        loop {
            if let TaskStatus::Finished(result) = &*status {
                return result.clone();
            }
            if self.state.on_worker_thread() {
                return Err(self.self_wait_error());
            }
            self.state.done.wait(&mut status);
        }
    }

    /// Like [`TaskHandle::wait`] but gives up after `timeout`, returning
    /// `None` if the task is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PrefsResult<()>> {
        let mut status = self.state.status.lock();
        if !matches!(*status, TaskStatus::Finished(_)) {
            if self.state.on_worker_thread() {
                return Some(Err(self.self_wait_error()));
            }
            let _ = self
                .state
                .done
                .wait_while_for(&mut status, |s| !matches!(s, TaskStatus::Finished(_)), timeout);
        }
        match &*status {
            TaskStatus::Finished(result) => Some(result.clone()),
            TaskStatus::Queued | TaskStatus::Running => None,
        }
    }

    /// Cancel the task if it has not started. Returns whether it was
    /// cancelled.
    pub fn cancel(&self) -> bool {
        let mut status = self.state.status.lock();
        if !matches!(*status, TaskStatus::Queued) {
            return false;
        }
        *status = TaskStatus::Finished(Err(TaskError::Cancelled {
            task: self.state.name.clone(),
        }
        .into()));
        self.state.done.notify_all();
        true
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.state.status.lock(), TaskStatus::Finished(_))
    }

    /// Outcome if finished, without blocking.
    pub fn outcome(&self) -> Option<PrefsResult<()>> {
        match &*self.state.status.lock() {
            TaskStatus::Finished(result) => Some(result.clone()),
            TaskStatus::Queued | TaskStatus::Running => None,
        }
    }

    fn self_wait_error(&self) -> binprefs_core::PrefsError {
        TaskError::Failed {
            task: self.state.name.clone(),
            reason: "cannot wait for a pending task from its own executor thread".to_string(),
        }
        .into()
    }
}
