//! Job lifecycle records.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key-value bag attached to a job at creation.
pub type JobMetadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a background job.
///
/// ```text
/// PENDING ──▶ RUNNING ──▶ SUCCEEDED | FAILED
///    │           │
///    └───────────┴──────▶ CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Returns true when no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical state of one job. Only the registry holds these; callers get
/// [`JobSnapshot`] copies.
#[derive(Debug)]
pub(crate) struct JobState {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: VecDeque<String>,
    pub logs_dropped: usize,
    pub result_resource: Option<String>,
    pub error: Option<String>,
    pub metadata: JobMetadata,
    pub cancel_requested: bool,
    /// The body has returned (or will never run). Distinct from a terminal
    /// status: a cancelled body may still be unwinding.
    pub settled: bool,
}

impl JobState {
    pub fn new(job_id: impl Into<String>, metadata: JobMetadata) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            logs: VecDeque::new(),
            logs_dropped: 0,
            result_resource: None,
            error: None,
            metadata,
            cancel_requested: false,
            settled: false,
        }
    }

    /// PENDING -> RUNNING. Returns false if the job was cancelled first.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Record a natural completion. Never overrides a terminal status, so a
    /// late finish after cancellation is dropped.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.error = error;
        true
    }

    /// Transition to CANCELLED. Fails with the current status if terminal.
    pub fn cancel(&mut self, reason: &str) -> Result<(), JobStatus> {
        if self.status.is_terminal() {
            return Err(self.status);
        }
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason.to_string());
        self.cancel_requested = true;
        Ok(())
    }

    /// Append a formatted log line. `cap == 0` keeps everything.
    pub fn push_log(&mut self, line: String, cap: usize) {
        self.logs.push_back(line);
        if cap > 0 {
            while self.logs.len() > cap {
                self.logs.pop_front();
                self.logs_dropped += 1;
            }
        }
    }

    /// Set the result locator. The first value wins.
    pub fn set_result_resource(&mut self, uri: String) -> bool {
        if self.result_resource.is_some() {
            return false;
        }
        self.result_resource = Some(uri);
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            logs: self.logs.iter().cloned().collect(),
            logs_dropped: self.logs_dropped,
            result_resource: self.result_resource.clone(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            cancel_requested: self.cancel_requested,
        }
    }
}

/// Immutable deep copy of a job's state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub logs_dropped: usize,
    pub result_resource: Option<String>,
    pub error: Option<String>,
    pub metadata: JobMetadata,
    pub cancel_requested: bool,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl JobSnapshot {
    /// False once the job failed or was cancelled.
    pub fn is_ok(&self) -> bool {
        !matches!(self.status, JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Payload returned by the job status tool.
    pub fn status_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "job_id": self.job_id,
            "status": self.status.as_str(),
            "created_at": self.created_at.to_rfc3339(),
            "started_at": self.started_at.map(|t| t.to_rfc3339()),
            "finished_at": self.finished_at.map(|t| t.to_rfc3339()),
            "logs": self.logs,
            "result_resource": self.result_resource,
            "error": self.error,
            "metadata": self.metadata,
            "cancel_requested": self.cancel_requested,
            "ok": self.is_ok(),
        });
        if self.logs_dropped > 0 {
            payload["logs_dropped"] = serde_json::json!(self.logs_dropped);
        }
        payload
    }
}

/// Payload returned by the job status tool for an id the registry never saw.
pub fn unknown_job_payload(job_id: &str) -> serde_json::Value {
    serde_json::json!({
        "job_id": job_id,
        "status": "UNKNOWN",
        "error": "Job not found. Ensure you called a job-starting tool first.",
        "logs": [],
        "result_resource": null,
        "metadata": {},
        "ok": false,
    })
}
