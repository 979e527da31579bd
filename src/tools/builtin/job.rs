//! Job management tools.
//!
//! These tools let the agent follow the background jobs it started:
//! - Check a job's status and logs
//! - Cancel a running job
//! - List jobs

use std::sync::Arc;

use async_trait::async_trait;

use crate::jobs::{JobRegistry, JobStatus, unknown_job_payload};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, require_str};

/// Tool for checking job status.
pub struct JobStatusTool {
    jobs: Arc<JobRegistry>,
}

impl JobStatusTool {
    pub fn new(jobs: Arc<JobRegistry>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for JobStatusTool {
    fn name(&self) -> &str {
        "get_job_status"
    }

    fn description(&self) -> &str {
        "Get the status, timestamps and log lines of a background job. Poll this after \
         starting a job until the status is SUCCEEDED, FAILED or CANCELLED, then read \
         result_resource for the output."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "job_id": {
                    "type": "string",
                    "description": "The job ID returned by a job-starting tool"
                }
            },
            "required": ["job_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let job_id = require_str(&params, "job_id")?;

        let result = match self.jobs.get_state(job_id) {
            Some(snapshot) => snapshot.status_payload(),
            None => unknown_job_payload(job_id),
        };
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

/// Tool for cancelling a job.
pub struct CancelJobTool {
    jobs: Arc<JobRegistry>,
}

impl CancelJobTool {
    pub fn new(jobs: Arc<JobRegistry>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for CancelJobTool {
    fn name(&self) -> &str {
        "cancel_job"
    }

    fn description(&self) -> &str {
        "Cancel a pending or running job. A running script is stopped; the job is marked \
         CANCELLED immediately."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "job_id": {
                    "type": "string",
                    "description": "The job ID to cancel"
                },
                "reason": {
                    "type": "string",
                    "description": "Why the job is being cancelled (recorded in its log)"
                }
            },
            "required": ["job_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let job_id = require_str(&params, "job_id")?;
        let reason = params.get("reason").and_then(|v| v.as_str());

        let jobs = Arc::clone(&self.jobs);
        let id = job_id.to_string();
        let reason = reason.map(str::to_string);
        // Cancel callbacks may block briefly while they stop a process.
        let outcome = tokio::task::spawn_blocking(move || jobs.cancel_job(&id, reason.as_deref()))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cancel task failed: {}", e)))?;

        let mut result = serde_json::json!({
            "job_id": job_id,
            "ok": outcome.ok,
            "message": outcome.message,
        });
        if let Some(snapshot) = self.jobs.get_state(job_id) {
            result["status"] = serde_json::json!(snapshot.status.as_str());
        }
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

/// Tool for listing jobs.
pub struct ListJobsTool {
    jobs: Arc<JobRegistry>,
}

impl ListJobsTool {
    pub fn new(jobs: Arc<JobRegistry>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for ListJobsTool {
    fn name(&self) -> &str {
        "list_jobs"
    }

    fn description(&self) -> &str {
        "List background jobs, oldest first, optionally filtered. Shows job IDs, kinds and \
         current status."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "string",
                    "description": "Filter by status: 'active', 'succeeded', 'failed', 'cancelled', 'all' (default: 'all')",
                    "enum": ["active", "succeeded", "failed", "cancelled", "all"]
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();

        let filter = params
            .get("filter")
            .and_then(|v| v.as_str())
            .unwrap_or("all");

        let all = self.jobs.list_jobs();
        let count = |status: JobStatus| all.iter().filter(|j| j.status == status).count();
        let summary = serde_json::json!({
            "total": all.len(),
            "pending": count(JobStatus::Pending),
            "running": count(JobStatus::Running),
            "succeeded": count(JobStatus::Succeeded),
            "failed": count(JobStatus::Failed),
            "cancelled": count(JobStatus::Cancelled),
        });

        let jobs: Vec<serde_json::Value> = all
            .iter()
            .filter(|j| match filter {
                "active" => !j.status.is_terminal(),
                "succeeded" => j.status == JobStatus::Succeeded,
                "failed" => j.status == JobStatus::Failed,
                "cancelled" => j.status == JobStatus::Cancelled,
                _ => true,
            })
            .map(|j| {
                serde_json::json!({
                    "job_id": j.job_id,
                    "kind": j.metadata.get("kind"),
                    "status": j.status.as_str(),
                    "created_at": j.created_at.to_rfc3339(),
                    "finished_at": j.finished_at.map(|t| t.to_rfc3339()),
                    "result_resource": j.result_resource,
                })
            })
            .collect();

        let result = serde_json::json!({
            "jobs": jobs,
            "summary": summary,
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}
