//! Single-worker executor serializing every mutation of one store.

use super::failure::FailureHandler;
use super::handle::{TaskHandle, TaskState};
use binprefs_core::{PrefsError, PrefsResult, ShutdownPolicy, StoreName, TaskError};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error};

type Work = Box<dyn FnOnce() -> PrefsResult<()> + Send + 'static>;

struct Job {
    state: Arc<TaskState>,
    on_failure: Arc<dyn FailureHandler>,
    work: Work,
}

/// One long-lived worker thread draining a FIFO queue of tasks.
///
/// Tasks run strictly in submission order. A task that returns an error or
/// panics is reported to its failure handler and the worker moves on to the
/// next task.
#[derive(Debug)]
pub struct StoreExecutor {
    store: StoreName,
    policy: ShutdownPolicy,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    discard: Arc<AtomicBool>,
}

impl StoreExecutor {
    /// Spawn the worker thread `binprefs-<store>`.
    pub fn spawn(store: StoreName, policy: ShutdownPolicy) -> PrefsResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let discard = Arc::new(AtomicBool::new(false));

        let worker_store = store.clone();
        let worker_discard = Arc::clone(&discard);
        let worker = thread::Builder::new()
            .name(format!("binprefs-{}", store))
            .spawn(move || run_worker(worker_store, receiver, worker_discard))
            .map_err(|e| TaskError::Failed {
                task: "spawn".to_string(),
                reason: e.to_string(),
            })?;

        debug!(store = %store, "Store executor started");
        Ok(Self {
            worker_id: worker.thread().id(),
            store,
            policy,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            discard,
        })
    }

    pub fn store(&self) -> &StoreName {
        &self.store
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    /// Whether the calling thread is this executor's worker.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue `work` behind every previously submitted task.
    ///
    /// Never blocks and never fails synchronously: after shutdown the
    /// returned handle is already finished with `ExecutorShutDown`.
    pub fn submit<F>(&self, name: &str, on_failure: Arc<dyn FailureHandler>, work: F) -> TaskHandle
    where
        F: FnOnce() -> PrefsResult<()> + Send + 'static,
    {
        let state = Arc::new(TaskState::new(name, Some(self.worker_id)));
        let job = Job {
            state: Arc::clone(&state),
            on_failure,
            work: Box::new(work),
        };

        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            let err = PrefsError::from(TaskError::ExecutorShutDown {
                store: self.store.to_string(),
            });
            report(&self.store, job.state.name(), job.on_failure.as_ref(), &err);
            job.state.finish(Err(err));
        }

        TaskHandle::new(state)
    }

    /// Stop accepting tasks and wait for the worker to exit, applying the
    /// configured shutdown policy to anything still queued.
    pub fn shutdown(&self) {
        self.shutdown_with(self.policy);
    }

    pub fn shutdown_with(&self, policy: ShutdownPolicy) {
        if policy == ShutdownPolicy::Discard {
            self.discard.store(true, Ordering::Release);
        }
        drop(self.sender.lock().take());

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if self.is_worker_thread() {
            // Shut down from inside one of our own tasks; the loop exits on
            // its own once the queue is drained.
            return;
        }
        if worker.join().is_err() {
            error!(store = %self.store, "Store executor thread panicked");
        }
        debug!(store = %self.store, policy = %policy, "Store executor stopped");
    }
}

impl Drop for StoreExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(store: StoreName, receiver: mpsc::Receiver<Job>, discard: Arc<AtomicBool>) {
    while let Ok(job) = receiver.recv() {
        if discard.load(Ordering::Acquire) {
            let err = PrefsError::from(TaskError::Discarded {
                task: job.state.name().to_string(),
            });
            if job.state.try_start() {
                report(&store, job.state.name(), job.on_failure.as_ref(), &err);
                job.state.finish(Err(err));
            }
            continue;
        }
        run_job(&store, job);
    }
}

fn run_job(store: &StoreName, job: Job) {
    if !job.state.try_start() {
        debug!(store = %store, task = job.state.name(), "Skipping cancelled task");
        return;
    }

    let Job {
        state,
        on_failure,
        work,
    } = job;
    let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            task: state.name().to_string(),
            reason: panic_message(payload.as_ref()),
        }
        .into()),
    };

    if let Err(err) = &result {
        report(store, state.name(), on_failure.as_ref(), err);
    }
    state.finish(result);
}

/// Hand a failure to the job's handler, containing any panic it raises.
fn report(store: &StoreName, task: &str, handler: &dyn FailureHandler, err: &PrefsError) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.on_failure(store, task, err)));
    if let Err(payload) = outcome {
        error!(
            store = %store,
            task,
            panic = %panic_message(payload.as_ref()),
            "Failure handler panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
