//! Script execution tools.
//!
//! `execute_script` blocks the call until the script finishes.
//! `start_execute_script_job` runs the same script as a background job and
//! streams its output into the job log.

use std::sync::Arc;

use async_trait::async_trait;

use crate::jobs::{ArtifactPayload, JobMetadata, resource_uri};
use crate::script::{DetachedRun, ScriptRequest};
use crate::tools::blocking::run_blocking;
use crate::tools::builtin::{ToolServices, target_properties};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput};

const KIND: &str = "execute_script";

fn script_parameters_schema() -> serde_json::Value {
    let mut props = target_properties();
    props.insert(
        "code".into(),
        serde_json::json!({
            "type": "string",
            "description": "Script source. Print a 'SUMMARY:' block to report the outcome."
        }),
    );
    props.insert(
        "timeout_sec".into(),
        serde_json::json!({
            "type": "number",
            "description": "Soft timeout enforced inside the script runner"
        }),
    );
    props.insert(
        "hard_timeout_sec".into(),
        serde_json::json!({
            "type": "number",
            "description": "Hard timeout; the runner process is killed and diagnostics captured"
        }),
    );
    props.insert(
        "pause_on_end".into(),
        serde_json::json!({"type": "boolean", "description": "Pause the game when the script ends (default true)"}),
    );
    props.insert(
        "unpause_on_start".into(),
        serde_json::json!({"type": "boolean", "description": "Unpause the game before running (default true)"}),
    );
    props.insert(
        "allow_imports".into(),
        serde_json::json!({"type": "boolean", "description": "Permit import statements (default false)"}),
    );
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": ["code"]
    })
}

fn parse_request(params: &serde_json::Value, services: &ToolServices) -> Result<ScriptRequest, ToolError> {
    ScriptRequest::from_params(params, &services.sim.default_target)
        .map_err(|e| ToolError::InvalidParameters(format!("invalid script parameters: {}", e)))
}

/// Run a script and wait for its result.
pub struct ExecuteScriptTool {
    services: ToolServices,
}

impl ExecuteScriptTool {
    pub fn new(services: ToolServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for ExecuteScriptTool {
    fn name(&self) -> &str {
        KIND
    }

    fn description(&self) -> &str {
        "Run a script against the simulation and wait for it to finish. Returns the summary, \
         transcript, structured error and timing. For scripts that may run longer than a \
         tool call allows, use start_execute_script_job instead."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        script_parameters_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let request = parse_request(&params, &self.services)?;

        let observer = Arc::new(DetachedRun::new());
        let cleanup_observer = Arc::clone(&observer);
        let runner = Arc::clone(&self.services.runner);
        // If this call is abandoned the child process is stopped too.
        let result = run_blocking(
            None,
            Some(Box::new(move || cleanup_observer.cancel())),
            move || runner.run(&request, observer),
        )
        .await?;

        let value = serde_json::to_value(&result)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode result: {}", e)))?;
        Ok(ToolOutput::success(value, start.elapsed()))
    }
}

/// Start a script as a background job.
pub struct StartScriptJobTool {
    services: ToolServices,
}

impl StartScriptJobTool {
    pub fn new(services: ToolServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for StartScriptJobTool {
    fn name(&self) -> &str {
        "start_execute_script_job"
    }

    fn description(&self) -> &str {
        "Start a script as a background job and return its job_id immediately. Script output \
         appears in the job log as it is printed. When the job succeeds, read its \
         result_resource for the full result."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        script_parameters_schema()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let request = parse_request(&params, &self.services)?;
        let echoed = serde_json::to_value(&request)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode params: {}", e)))?;

        let mut metadata = JobMetadata::new();
        metadata.insert("kind".into(), serde_json::json!(KIND));
        metadata.insert("params".into(), echoed.clone());

        let runner = Arc::clone(&self.services.runner);
        let artifacts = Arc::clone(&self.services.artifacts);
        let job_id = self.services.jobs.create_job(
            move |handle| {
                handle.log("[execute_script] launching job");
                let result = runner.run(&request, Arc::new(handle.clone()));
                let result = serde_json::to_value(&result)?;

                let payload = ArtifactPayload::new(handle.job_id(), KIND, echoed, result);
                let path = artifacts.save(handle.job_id(), &payload)?;
                handle.set_result_resource(resource_uri(handle.job_id()));
                handle.log(format!(
                    "[execute_script] artifact ready at {}",
                    path.display()
                ));
                Ok(())
            },
            metadata,
        )?;

        tracing::info!(job_id = %job_id, "Started script job");

        let result = serde_json::json!({
            "job_id": job_id,
            "status": "PENDING",
            "note": "Script job started. Poll get_job_status(job_id) for live logs, \
                     then read result_resource once it has SUCCEEDED.",
        });
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::ScriptConfig;
    use crate::jobs::JobStatus;
    use crate::sim::DisconnectedConnector;
    use crate::tools::builtin::testing;

    fn sh_config() -> ScriptConfig {
        ScriptConfig::default()
            .with_runner("sh", vec!["-c".to_string(), "exec sh ./user_code.sh".to_string()])
            .with_script_file_name("user_code.sh")
    }

    #[tokio::test]
    async fn test_execute_script_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(dir.path(), Arc::new(DisconnectedConnector), sh_config());
        let tool = ExecuteScriptTool::new(services);

        let out = tool
            .execute(
                json!({"code": "echo 'SUMMARY: done'"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.result["ok"], true);
        assert_eq!(out.result["summary"], "done");
    }

    #[tokio::test]
    async fn test_execute_script_requires_code() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(dir.path(), Arc::new(DisconnectedConnector), sh_config());
        let err = ExecuteScriptTool::new(services)
            .execute(json!({"rpc_port": 1}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_script_job_streams_logs_and_saves_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(dir.path(), Arc::new(DisconnectedConnector), sh_config());
        let tool = StartScriptJobTool::new(services.clone());

        let out = tool
            .execute(
                json!({"code": "echo 'hello from script'\necho 'SUMMARY: ok'"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.result["status"], "PENDING");
        let job_id = out.result["job_id"].as_str().unwrap().to_string();

        let jobs = services.jobs.clone();
        let id = job_id.clone();
        tokio::task::spawn_blocking(move || jobs.wait_for(&id, Some(Duration::from_secs(10))))
            .await
            .unwrap()
            .unwrap();

        let snapshot = services.jobs.get_state(&job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert_eq!(snapshot.metadata["kind"], "execute_script");
        assert!(snapshot.logs[0].ends_with("[log] [execute_script] launching job"));
        assert!(
            snapshot
                .logs
                .iter()
                .any(|l| l.ends_with("[execute_script:stdout] hello from script"))
        );
        assert_eq!(
            snapshot.result_resource.as_deref(),
            Some(resource_uri(&job_id).as_str())
        );

        let saved = services.artifacts.load(&job_id).unwrap().unwrap();
        let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved["kind"], "execute_script");
        assert_eq!(saved["result"]["summary"], "ok");
        assert_eq!(saved["params"]["code"], "echo 'hello from script'\necho 'SUMMARY: ok'");
    }

    #[tokio::test]
    async fn test_cancelling_script_job_stops_runner() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(dir.path(), Arc::new(DisconnectedConnector), sh_config());
        let tool = StartScriptJobTool::new(services.clone());

        let out = tool
            .execute(
                json!({"code": "echo started\nexec sleep 30"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        let job_id = out.result["job_id"].as_str().unwrap().to_string();

        // Wait until the runner is live before cancelling.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let snapshot = services.jobs.get_state(&job_id).unwrap();
            if snapshot.logs.iter().any(|l| l.ends_with("started")) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "script never started");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let jobs = services.jobs.clone();
        let id = job_id.clone();
        let begun = std::time::Instant::now();
        tokio::task::spawn_blocking(move || {
            let outcome = jobs.cancel_job(&id, None);
            assert!(outcome.ok);
            jobs.wait_for(&id, Some(Duration::from_secs(10)))
        })
        .await
        .unwrap()
        .unwrap();

        assert!(begun.elapsed() < Duration::from_secs(10));
        let snapshot = services.jobs.get_state(&job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
    }
}
