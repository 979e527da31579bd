//! Background jobs that run one simulation reader and save its output.
//!
//! Part trees and stage plans can take longer to walk than a tool call is
//! allowed to block, so both are only offered as jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{JobError, SimError};
use crate::jobs::{ArtifactPayload, JobMetadata, resource_uri};
use crate::sim::{Session, SimConnection, SimTarget, part_tree, stage_plan};
use crate::tools::builtin::{ToolServices, parse_target, parse_timeout, target_properties};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput};

const STARTED_NOTE: &str = "Job started. Poll get_job_status(job_id) until it completes.";

/// Queue a job that connects, runs `read`, and publishes the result as an
/// artifact. The connection is closed however the body exits.
fn start_reader_job<R>(
    services: &ToolServices,
    kind: &'static str,
    target: SimTarget,
    timeout: Duration,
    params: Value,
    read: R,
) -> Result<String, JobError>
where
    R: FnOnce(&mut dyn SimConnection) -> Result<Value, SimError> + Send + 'static,
{
    let mut metadata = JobMetadata::new();
    metadata.insert("kind".into(), serde_json::json!(kind));
    metadata.insert("params".into(), params.clone());

    let connector = Arc::clone(&services.connector);
    let artifacts = Arc::clone(&services.artifacts);
    services.jobs.create_job(
        move |handle| {
            handle.log(format!("[{}] Connecting to simulation at {}", kind, target));
            let mut session = match Session::open(connector.as_ref(), &target, timeout) {
                Ok(session) => session,
                Err(e) => {
                    handle.log(format!("[{}] Connection failed: {}", kind, e));
                    return Err(e.into());
                }
            };

            handle.log(format!("[{}] Reader running...", kind));
            let result = read(session.conn())?;

            let payload = ArtifactPayload::new(handle.job_id(), kind, params, result);
            artifacts.save(handle.job_id(), &payload)?;
            handle.log(format!("[{}] Artifact saved; exposing as resource.", kind));
            handle.set_result_resource(resource_uri(handle.job_id()));
            Ok(())
        },
        metadata,
    )
}

fn started(job_id: String, start: std::time::Instant) -> ToolOutput {
    ToolOutput::success(
        serde_json::json!({
            "job_id": job_id,
            "status": "PENDING",
            "note": STARTED_NOTE,
        }),
        start.elapsed(),
    )
}

fn reader_schema(extra: &[(&str, Value)]) -> Value {
    let mut props = target_properties();
    props.insert(
        "timeout".into(),
        serde_json::json!({"type": "number", "description": "Connect timeout in seconds (default 5)"}),
    );
    for (name, schema) in extra {
        props.insert((*name).to_string(), schema.clone());
    }
    serde_json::json!({
        "type": "object",
        "properties": props
    })
}

/// Start a job that reads the active vessel's part tree.
pub struct PartTreeJobTool {
    services: ToolServices,
}

impl PartTreeJobTool {
    pub fn new(services: ToolServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for PartTreeJobTool {
    fn name(&self) -> &str {
        "start_part_tree_job"
    }

    fn description(&self) -> &str {
        "Start a background job that reads the active vessel's full part tree. Returns a \
         job_id; the tree is published as a resource when the job succeeds."
    }

    fn parameters_schema(&self) -> Value {
        reader_schema(&[])
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let target = parse_target(&params, &self.services.sim.default_target)?;
        let timeout = parse_timeout(&params, self.services.sim.connect_timeout())?;

        let echoed = target.to_params();
        let job_id = start_reader_job(
            &self.services,
            "part_tree",
            target,
            timeout,
            echoed,
            part_tree,
        )?;
        Ok(started(job_id, start))
    }
}

/// Start a job that computes the staging plan.
pub struct StagePlanJobTool {
    services: ToolServices,
}

impl StagePlanJobTool {
    pub fn new(services: ToolServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for StagePlanJobTool {
    fn name(&self) -> &str {
        "start_stage_plan_job"
    }

    fn description(&self) -> &str {
        "Start a background job that computes per-stage delta-v and burn times for the \
         active vessel. Returns a job_id; the plan is published as a resource when the job \
         succeeds."
    }

    fn parameters_schema(&self) -> Value {
        reader_schema(&[(
            "environment",
            serde_json::json!({
                "type": "string",
                "description": "'current', 'sea_level' or 'vacuum' (default 'current')"
            }),
        )])
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let target = parse_target(&params, &self.services.sim.default_target)?;
        let timeout = parse_timeout(&params, self.services.sim.connect_timeout())?;
        let environment = params
            .get("environment")
            .and_then(|v| v.as_str())
            .unwrap_or("current")
            .to_string();

        let mut echoed = target.to_params();
        echoed["environment"] = serde_json::json!(environment);
        let job_id = start_reader_job(
            &self.services,
            "stage_plan",
            target,
            timeout,
            echoed,
            move |conn| stage_plan(conn, &environment),
        )?;
        Ok(started(job_id, start))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ScriptConfig;
    use crate::jobs::JobStatus;
    use crate::sim::testing::{FakeConnector, FakeSim};
    use crate::tools::builtin::testing;

    async fn wait(services: &ToolServices, job_id: &str) {
        let jobs = services.jobs.clone();
        let id = job_id.to_string();
        tokio::task::spawn_blocking(move || jobs.wait_for(&id, Some(Duration::from_secs(5))))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_part_tree_job_publishes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let sim = FakeSim::default().with("readers.part_tree", Ok(json!({"root": "pod"})));
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::new(sim.clone())),
            ScriptConfig::default(),
        );

        let out = PartTreeJobTool::new(services.clone())
            .execute(json!({"address": "10.0.0.2"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out.result["status"], "PENDING");
        assert_eq!(out.result["note"], STARTED_NOTE);
        let job_id = out.result["job_id"].as_str().unwrap().to_string();
        wait(&services, &job_id).await;

        let snapshot = services.jobs.get_state(&job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert!(snapshot.logs[0].ends_with("[part_tree] Connecting to simulation at 10.0.0.2:50000/50001"));
        assert!(snapshot.logs.last().unwrap().ends_with("Artifact saved; exposing as resource."));
        assert_eq!(snapshot.result_resource, Some(resource_uri(&job_id)));
        assert_eq!(snapshot.metadata["params"]["address"], "10.0.0.2");
        assert_eq!(*sim.closed.lock().unwrap(), 1);

        let saved: Value =
            serde_json::from_str(&services.artifacts.load(&job_id).unwrap().unwrap()).unwrap();
        assert_eq!(saved["kind"], "part_tree");
        assert_eq!(saved["result"], json!({"root": "pod"}));
    }

    #[tokio::test]
    async fn test_stage_plan_job_passes_environment() {
        let dir = tempfile::tempdir().unwrap();
        let sim = FakeSim::default().with("readers.stage_plan", Ok(json!({"stages": []})));
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::new(sim.clone())),
            ScriptConfig::default(),
        );

        let out = StagePlanJobTool::new(services.clone())
            .execute(json!({"environment": "vacuum"}), &ToolContext::default())
            .await
            .unwrap();
        let job_id = out.result["job_id"].as_str().unwrap().to_string();
        wait(&services, &job_id).await;

        assert_eq!(
            services.jobs.get_state(&job_id).unwrap().status,
            JobStatus::Succeeded
        );
        assert_eq!(sim.calls_to("readers.stage_plan"), vec![vec![json!("vacuum")]]);
    }

    #[tokio::test]
    async fn test_connection_failure_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::refusing()),
            ScriptConfig::default(),
        );

        let out = PartTreeJobTool::new(services.clone())
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap();
        let job_id = out.result["job_id"].as_str().unwrap().to_string();
        wait(&services, &job_id).await;

        let snapshot = services.jobs.get_state(&job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.error.unwrap().contains("connection refused"));
        assert!(snapshot.logs.iter().any(|l| l.contains("[part_tree] Connection failed")));
        assert!(snapshot.result_resource.is_none());
    }

    #[tokio::test]
    async fn test_reader_failure_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sim = FakeSim::default();
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::new(sim.clone())),
            ScriptConfig::default(),
        );

        let out = PartTreeJobTool::new(services.clone())
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap();
        let job_id = out.result["job_id"].as_str().unwrap().to_string();
        wait(&services, &job_id).await;

        let snapshot = services.jobs.get_state(&job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(*sim.closed.lock().unwrap(), 1);
    }
}
