//! Job registry: id allocation, a bounded worker pool, and cancellation.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::JobsConfig;
use crate::error::JobError;
use crate::jobs::handle::JobHandle;
use crate::jobs::log_stream::{LogStreamKind, format_log_line};
use crate::jobs::state::{JobMetadata, JobSnapshot, JobState, JobStatus};
use crate::util::lock_unpoisoned;

/// Reason recorded when a caller cancels without giving one.
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by user request.";

pub(crate) type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

type JobBody = Box<dyn FnOnce(&JobHandle) -> anyhow::Result<()> + Send + 'static>;

struct QueuedJob {
    job_id: String,
    body: JobBody,
}

#[derive(Default)]
struct JobTable {
    states: HashMap<String, JobState>,
    cancel_callbacks: HashMap<String, CancelCallback>,
}

/// Shared state behind the registry and every [`JobHandle`].
pub(crate) struct RegistryCore {
    table: Mutex<JobTable>,
    settled: Condvar,
    max_log_lines: usize,
}

impl RegistryCore {
    pub(crate) fn append_log(&self, job_id: &str, stream: LogStreamKind, message: &str) {
        let line = format_log_line(stream, message);
        let mut table = lock_unpoisoned(&self.table);
        if let Some(state) = table.states.get_mut(job_id) {
            state.push_log(line, self.max_log_lines);
        }
    }

    pub(crate) fn set_result_resource(&self, job_id: &str, uri: String) {
        let mut table = lock_unpoisoned(&self.table);
        if let Some(state) = table.states.get_mut(job_id)
            && !state.set_result_resource(uri)
        {
            tracing::warn!(job_id = %job_id, "Result resource already set; keeping the first value");
        }
    }

    pub(crate) fn register_cancel_callback(&self, job_id: &str, callback: CancelCallback) {
        let run_now = {
            let mut table = lock_unpoisoned(&self.table);
            match table.states.get(job_id) {
                None => return,
                Some(state) if state.cancel_requested => Some(callback),
                Some(_) => {
                    table.cancel_callbacks.insert(job_id.to_string(), callback);
                    None
                }
            }
        };
        if let Some(callback) = run_now {
            invoke_cancel_callback(job_id, callback);
        }
    }

    pub(crate) fn is_cancel_requested(&self, job_id: &str) -> bool {
        lock_unpoisoned(&self.table)
            .states
            .get(job_id)
            .is_some_and(|s| s.cancel_requested)
    }

    fn mark_running(&self, job_id: &str) -> bool {
        lock_unpoisoned(&self.table)
            .states
            .get_mut(job_id)
            .is_some_and(JobState::mark_running)
    }

    /// Record the body's outcome, drop its callback, and wake waiters.
    fn complete(&self, job_id: &str, outcome: Option<(JobStatus, Option<String>)>) {
        {
            let mut table = lock_unpoisoned(&self.table);
            table.cancel_callbacks.remove(job_id);
            if let Some(state) = table.states.get_mut(job_id) {
                if let Some((status, error)) = outcome {
                    if state.finish(status, error) {
                        tracing::info!(job_id = %job_id, "Job finished with status {}", status);
                    } else {
                        tracing::debug!(
                            job_id = %job_id,
                            "Job body returned after reaching {}; outcome dropped",
                            state.status
                        );
                    }
                }
                state.settled = true;
            }
        }
        self.settled.notify_all();
    }

    fn run_job(self: &Arc<Self>, job: QueuedJob) {
        let QueuedJob { job_id, body } = job;

        if !self.mark_running(&job_id) {
            tracing::debug!(job_id = %job_id, "Skipping job cancelled before it started");
            self.complete(&job_id, None);
            return;
        }
        tracing::debug!(job_id = %job_id, "Job started");

        let handle = JobHandle::new(Arc::clone(self), job_id.clone());
        let result = {
            let _capture = handle.capture_output();
            panic::catch_unwind(AssertUnwindSafe(|| body(&handle)))
        };

        let outcome = match result {
            Ok(Ok(())) => (JobStatus::Succeeded, None),
            Ok(Err(e)) => (JobStatus::Failed, Some(format!("{:#}", e))),
            Err(payload) => (JobStatus::Failed, Some(panic_message(payload.as_ref()))),
        };
        self.complete(&job_id, Some(outcome));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}

fn invoke_cancel_callback(job_id: &str, callback: CancelCallback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!(job_id = %job_id, "Cancel callback panicked");
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub ok: bool,
    pub message: String,
}

impl CancelOutcome {
    fn accepted() -> Self {
        Self {
            ok: true,
            message: "Job cancellation requested.".to_string(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Owns every job and the worker threads that run them.
///
/// At most `max_workers` bodies run at once; the rest wait in FIFO order.
/// State is only reachable through snapshots.
pub struct JobRegistry {
    core: Arc<RegistryCore>,
    queue: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl JobRegistry {
    /// Create a registry with `max_workers` threads and the default log cap.
    pub fn new(max_workers: usize) -> Result<Self, JobError> {
        Self::from_config(&JobsConfig::default().with_max_workers(max_workers))
    }

    pub fn from_config(config: &JobsConfig) -> Result<Self, JobError> {
        let core = Arc::new(RegistryCore {
            table: Mutex::new(JobTable::default()),
            settled: Condvar::new(),
            max_log_lines: config.max_log_lines,
        });

        let (tx, rx) = mpsc::channel::<QueuedJob>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(config.max_workers.max(1));
        for i in 0..config.max_workers.max(1) {
            let core = Arc::clone(&core);
            let rx = Arc::clone(&rx);
            let worker = thread::Builder::new()
                .name(format!("job-runner-{}", i))
                .spawn(move || worker_loop(core, rx))
                .map_err(|e| JobError::Spawn {
                    reason: e.to_string(),
                })?;
            workers.push(worker);
        }

        tracing::debug!("Job registry started with {} workers", workers.len());

        Ok(Self {
            core,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job body. Returns the new job id immediately.
    pub fn create_job<F>(&self, body: F, metadata: JobMetadata) -> Result<String, JobError>
    where
        F: FnOnce(&JobHandle) -> anyhow::Result<()> + Send + 'static,
    {
        let queue = lock_unpoisoned(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(JobError::ShuttingDown);
        };

        let job_id = new_job_id();
        lock_unpoisoned(&self.core.table)
            .states
            .insert(job_id.clone(), JobState::new(job_id.clone(), metadata));

        let queued = QueuedJob {
            job_id: job_id.clone(),
            body: Box::new(body),
        };
        if tx.send(queued).is_err() {
            lock_unpoisoned(&self.core.table).states.remove(&job_id);
            return Err(JobError::ShuttingDown);
        }

        tracing::info!(job_id = %job_id, "Job created");
        Ok(job_id)
    }

    /// Snapshot of one job, or `None` for an unknown id.
    pub fn get_state(&self, job_id: &str) -> Option<JobSnapshot> {
        lock_unpoisoned(&self.core.table)
            .states
            .get(job_id)
            .map(JobState::snapshot)
    }

    /// Snapshots of every job, oldest first.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = lock_unpoisoned(&self.core.table)
            .states
            .values()
            .map(JobState::snapshot)
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    /// Block until the job's body has returned or will never run.
    ///
    /// A cancelled job reports CANCELLED immediately, but its body may keep
    /// running until the cancel callback takes effect; this waits for that.
    pub fn wait_for(&self, job_id: &str, timeout: Option<Duration>) -> Result<(), JobError> {
        let table = lock_unpoisoned(&self.core.table);
        if !table.states.contains_key(job_id) {
            return Err(JobError::NotFound {
                id: job_id.to_string(),
            });
        }

        let pending = |t: &mut JobTable| t.states.get(job_id).is_some_and(|s| !s.settled);

        match timeout {
            None => {
                let _table = self
                    .core
                    .settled
                    .wait_while(table, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(())
            }
            Some(limit) => {
                let (_table, result) = self
                    .core
                    .settled
                    .wait_timeout_while(table, limit, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() {
                    return Err(JobError::WaitTimeout {
                        id: job_id.to_string(),
                        timeout: limit,
                    });
                }
                Ok(())
            }
        }
    }

    /// Request cancellation.
    ///
    /// Non-terminal jobs become CANCELLED at once, the reason is logged, and
    /// the most recently registered cancel callback runs exactly once.
    /// A running body that registered no callback keeps running, so
    /// [`JobRegistry::wait_for`] only returns once it does, even though
    /// [`JobRegistry::get_state`] already reports CANCELLED.
    pub fn cancel_job(&self, job_id: &str, reason: Option<&str>) -> CancelOutcome {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);

        let (callback, was_pending) = {
            let mut table = lock_unpoisoned(&self.core.table);
            let Some(state) = table.states.get_mut(job_id) else {
                return CancelOutcome::rejected("Job not found.");
            };
            let was_pending = state.status == JobStatus::Pending;
            if let Err(status) = state.cancel(reason) {
                return CancelOutcome::rejected(format!(
                    "Job already finished with status {}.",
                    status
                ));
            }
            if was_pending {
                state.settled = true;
            }
            (table.cancel_callbacks.remove(job_id), was_pending)
        };

        if was_pending {
            self.core.settled.notify_all();
        }

        tracing::info!(job_id = %job_id, "Job cancelled: {}", reason);
        self.core.append_log(job_id, LogStreamKind::Log, reason);

        if let Some(callback) = callback {
            invoke_cancel_callback(job_id, callback);
        }

        CancelOutcome::accepted()
    }

    /// Append a log line to a job. Unknown ids are ignored.
    pub fn append_log(&self, job_id: &str, message: &str, stream: LogStreamKind) {
        self.core.append_log(job_id, stream, message);
    }

    /// Record a job's result locator. Unknown ids are ignored.
    pub fn set_result_resource(&self, job_id: &str, uri: impl Into<String>) {
        self.core.set_result_resource(job_id, uri.into());
    }

    /// Register a cancel callback. Unknown ids are ignored.
    pub fn register_cancel_callback<F>(&self, job_id: &str, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.register_cancel_callback(job_id, Box::new(callback));
    }

    /// Stop accepting jobs. Queued jobs still run; with `wait`, block until
    /// every worker has drained the queue and exited.
    pub fn shutdown(&self, wait: bool) {
        let sender = lock_unpoisoned(&self.queue).take();
        if sender.is_none() && !wait {
            return;
        }
        drop(sender);

        if wait {
            let workers = std::mem::take(&mut *lock_unpoisoned(&self.workers));
            for worker in workers {
                if worker.join().is_err() {
                    tracing::warn!("Job worker exited with a panic");
                }
            }
            tracing::info!("Job registry shut down");
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        // Workers exit on their own once the queue drains.
        lock_unpoisoned(&self.queue).take();
    }
}

fn worker_loop(core: Arc<RegistryCore>, rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>) {
    loop {
        let next = lock_unpoisoned(&rx).recv();
        match next {
            Ok(job) => core.run_job(job),
            Err(_) => break,
        }
    }
}

/// 128 random bits rendered as 32 lowercase hex characters.
fn new_job_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
