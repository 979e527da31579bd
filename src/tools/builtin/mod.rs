//! Built-in tools.

mod diagnostics;
mod job;
mod reader_jobs;
mod resource;
mod script;

pub use diagnostics::GetDiagnosticsTool;
pub use job::{CancelJobTool, JobStatusTool, ListJobsTool};
pub use reader_jobs::{PartTreeJobTool, StagePlanJobTool};
pub use resource::ReadResourceTool;
pub use script::{ExecuteScriptTool, StartScriptJobTool};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::SimConfig;
use crate::jobs::{JobArtifactStore, JobRegistry};
use crate::script::ScriptRunner;
use crate::sim::{SimConnector, SimTarget};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::ToolError;

/// Shared services the built-in tools operate on.
#[derive(Clone)]
pub struct ToolServices {
    pub jobs: Arc<JobRegistry>,
    pub artifacts: Arc<JobArtifactStore>,
    pub runner: Arc<ScriptRunner>,
    pub connector: Arc<dyn SimConnector>,
    pub sim: SimConfig,
}

/// Register every built-in tool.
pub async fn register_builtin_tools(registry: &ToolRegistry, services: &ToolServices) {
    registry
        .register(Arc::new(JobStatusTool::new(services.jobs.clone())))
        .await;
    registry
        .register(Arc::new(CancelJobTool::new(services.jobs.clone())))
        .await;
    registry
        .register(Arc::new(ListJobsTool::new(services.jobs.clone())))
        .await;
    registry
        .register(Arc::new(ExecuteScriptTool::new(services.clone())))
        .await;
    registry
        .register(Arc::new(StartScriptJobTool::new(services.clone())))
        .await;
    registry
        .register(Arc::new(PartTreeJobTool::new(services.clone())))
        .await;
    registry
        .register(Arc::new(StagePlanJobTool::new(services.clone())))
        .await;
    registry
        .register(Arc::new(GetDiagnosticsTool::new(services.clone())))
        .await;
    registry
        .register(Arc::new(ReadResourceTool::new(services.artifacts.clone())))
        .await;
}

/// JSON Schema properties shared by every tool that connects to the
/// simulation.
pub(crate) fn target_properties() -> serde_json::Map<String, Value> {
    let mut props = serde_json::Map::new();
    props.insert(
        "address".into(),
        serde_json::json!({"type": "string", "description": "Simulation host (defaults to the configured host)"}),
    );
    props.insert(
        "rpc_port".into(),
        serde_json::json!({"type": "integer", "description": "RPC port (default 50000)"}),
    );
    props.insert(
        "stream_port".into(),
        serde_json::json!({"type": "integer", "description": "Stream port (default 50001)"}),
    );
    props.insert(
        "name".into(),
        serde_json::json!({"type": "string", "description": "Optional client name shown in the simulation"}),
    );
    props
}

/// Read connection parameters, falling back to `defaults` field by field.
pub(crate) fn parse_target(params: &Value, defaults: &SimTarget) -> Result<SimTarget, ToolError> {
    let port = |name: &str, default: u16| -> Result<u16, ToolError> {
        match params.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| {
                    ToolError::InvalidParameters(format!("'{}' must be a port number", name))
                }),
        }
    };

    Ok(SimTarget {
        address: params
            .get("address")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| defaults.address.clone()),
        rpc_port: port("rpc_port", defaults.rpc_port)?,
        stream_port: port("stream_port", defaults.stream_port)?,
        name: params
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| defaults.name.clone()),
    })
}

/// Optional positive `timeout` parameter in seconds.
pub(crate) fn parse_timeout(params: &Value, default: Duration) -> Result<Duration, ToolError> {
    match params.get("timeout") {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
            .ok_or_else(|| {
                ToolError::InvalidParameters("'timeout' must be a positive number".into())
            }),
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_target_defaults_and_overrides() {
        let defaults = SimTarget::new("10.1.1.1").with_name("bridge");
        let target = parse_target(&json!({}), &defaults).unwrap();
        assert_eq!(target, defaults);

        let target = parse_target(&json!({"address": "h", "rpc_port": 7}), &defaults).unwrap();
        assert_eq!(target.address, "h");
        assert_eq!(target.rpc_port, 7);
        assert_eq!(target.stream_port, defaults.stream_port);

        assert!(parse_target(&json!({"rpc_port": 70000}), &defaults).is_err());
        assert!(parse_target(&json!({"stream_port": "x"}), &defaults).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        let default = Duration::from_secs(5);
        assert_eq!(parse_timeout(&json!({}), default).unwrap(), default);
        assert_eq!(
            parse_timeout(&json!({"timeout": 1.5}), default).unwrap(),
            Duration::from_millis(1500)
        );
        assert!(parse_timeout(&json!({"timeout": 0}), default).is_err());
        assert!(matches!(
            parse_timeout(&json!({"timeout": 1e20}), default),
            Err(ToolError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_register_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(
            dir.path(),
            Arc::new(crate::sim::DisconnectedConnector),
            crate::config::ScriptConfig::default(),
        );
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, &services).await;

        let names: Vec<String> = registry.schemas().await.into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "cancel_job",
                "execute_script",
                "get_diagnostics",
                "get_job_status",
                "list_jobs",
                "read_resource",
                "start_execute_script_job",
                "start_part_tree_job",
                "start_stage_plan_job",
            ]
        );
    }
}
