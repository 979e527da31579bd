//! Handle given to a running job body.

use std::sync::Arc;

use crate::jobs::log_stream::{LineSink, LogStream, LogStreamKind};
use crate::jobs::registry::RegistryCore;

/// A job body's view of its own job.
///
/// Cloning is cheap. Clones that outlive the body can still log; their lines
/// land after the terminal status is recorded.
#[derive(Clone)]
pub struct JobHandle {
    core: Arc<RegistryCore>,
    job_id: String,
    stdout: Arc<LogStream>,
    stderr: Arc<LogStream>,
}

impl JobHandle {
    pub(crate) fn new(core: Arc<RegistryCore>, job_id: String) -> Self {
        let sink: Arc<dyn LineSink> = Arc::new(JobLogSink {
            core: Arc::clone(&core),
            job_id: job_id.clone(),
        });
        Self {
            stdout: Arc::new(LogStream::new(Arc::clone(&sink), LogStreamKind::Stdout)),
            stderr: Arc::new(LogStream::new(sink, LogStreamKind::Stderr)),
            core,
            job_id,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append a line to the job log under the `log` stream.
    pub fn log(&self, message: impl AsRef<str>) {
        self.core
            .append_log(&self.job_id, LogStreamKind::Log, message.as_ref());
    }

    /// Record where the job's result can be fetched. First call wins.
    pub fn set_result_resource(&self, uri: impl Into<String>) {
        self.core.set_result_resource(&self.job_id, uri.into());
    }

    /// Register the action to run when the job is cancelled.
    ///
    /// Replaces any earlier callback. If cancellation was already requested
    /// the callback runs immediately on this thread.
    pub fn register_cancel_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core
            .register_cancel_callback(&self.job_id, Box::new(callback));
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.core.is_cancel_requested(&self.job_id)
    }

    /// Stream capturing the body's standard output.
    pub fn stdout(&self) -> &LogStream {
        &self.stdout
    }

    /// Stream capturing the body's standard error.
    pub fn stderr(&self) -> &LogStream {
        &self.stderr
    }

    /// Scope guard that flushes both streams when dropped.
    pub(crate) fn capture_output(&self) -> OutputCapture<'_> {
        OutputCapture { handle: self }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// Flushes a handle's streams on every exit path of the body.
pub(crate) struct OutputCapture<'a> {
    handle: &'a JobHandle,
}

impl Drop for OutputCapture<'_> {
    fn drop(&mut self) {
        self.handle.stdout.flush_pending();
        self.handle.stderr.flush_pending();
    }
}

struct JobLogSink {
    core: Arc<RegistryCore>,
    job_id: String,
}

impl LineSink for JobLogSink {
    fn append_line(&self, stream: LogStreamKind, line: &str) {
        self.core.append_log(&self.job_id, stream, line);
    }
}
