//! Background job execution.
//!
//! A [`JobRegistry`] runs job bodies on a fixed pool of worker threads and
//! keeps an in-memory record of each job: status, timestamps, a line-oriented
//! log, and an optional locator for the job's persisted result. Callers poll
//! snapshots; bodies report through a [`JobHandle`].

mod artifacts;
mod handle;
mod log_stream;
mod registry;
mod state;

pub use artifacts::{
    ArtifactPayload, JOB_RESOURCE_PREFIX, JobArtifactStore, job_id_from_locator, resource_uri,
};
pub use handle::JobHandle;
pub use log_stream::{LineSink, LogStream, LogStreamKind, format_log_line, sanitize_line};
pub use registry::{CancelOutcome, DEFAULT_CANCEL_REASON, JobRegistry};
pub use state::{JobMetadata, JobSnapshot, JobStatus, unknown_job_payload};
