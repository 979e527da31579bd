//! Running blocking simulation work from async tool handlers.

use std::time::Duration;

use crate::tools::tool::ToolError;

/// Cleanup hook run when blocking work is abandoned.
pub type Cleanup = Box<dyn FnOnce() + Send + 'static>;

struct CleanupGuard(Option<Cleanup>);

impl CleanupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.0.take() {
            cleanup();
        }
    }
}

/// Run `work` on the blocking pool, bounded by `timeout`.
///
/// If the timeout fires, or the returned future is dropped before the work
/// finishes, `cleanup` runs so the abandoned work can be told to stop. The
/// worker thread itself is not interrupted.
pub async fn run_blocking<T, F>(
    timeout: Option<Duration>,
    cleanup: Option<Cleanup>,
    work: F,
) -> Result<T, ToolError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut guard = CleanupGuard(cleanup);
    let task = tokio::task::spawn_blocking(work);

    let joined = match timeout {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("Blocking work exceeded {:?}; abandoning it", limit);
                drop(guard);
                return Err(ToolError::Timeout(limit));
            }
        },
    };

    match joined {
        Ok(value) => {
            guard.disarm();
            Ok(value)
        }
        Err(e) => Err(ToolError::ExecutionFailed(format!(
            "blocking task failed: {}",
            e
        ))),
    }
}
