//! Paused-state snapshot of the simulation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::sim::{DIAGNOSTIC_FIELDS, Session, collect_diagnostics};
use crate::tools::blocking::run_blocking;
use crate::tools::builtin::{ToolServices, parse_target, parse_timeout, target_properties};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput};

/// Reads vessel, time, environment, flight and orbit state in one call.
///
/// This is the follow-up suggested by failed or timed out scripts.
pub struct GetDiagnosticsTool {
    services: ToolServices,
}

impl GetDiagnosticsTool {
    pub fn new(services: ToolServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GetDiagnosticsTool {
    fn name(&self) -> &str {
        "get_diagnostics"
    }

    fn description(&self) -> &str {
        "Capture a snapshot of vessel, time, environment, flight and orbit state. Fields \
         that cannot be read are listed under 'errors' instead of failing the call."
    }

    fn parameters_schema(&self) -> Value {
        let mut props = target_properties();
        props.insert(
            "timeout".into(),
            serde_json::json!({"type": "number", "description": "Connect timeout in seconds (default 5)"}),
        );
        serde_json::json!({
            "type": "object",
            "properties": props
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let target = parse_target(&params, &self.services.sim.default_target)?;
        let timeout = parse_timeout(&params, self.services.sim.connect_timeout())?;

        let connector = Arc::clone(&self.services.connector);
        let echoed = target.to_params();
        let snapshot = run_blocking(None, None, move || {
            let mut session = Session::open(connector.as_ref(), &target, timeout)?;
            Ok::<_, crate::error::SimError>(collect_diagnostics(session.conn(), DIAGNOSTIC_FIELDS))
        })
        .await??;

        let mut result = snapshot;
        result["target"] = echoed;
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ScriptConfig;
    use crate::sim::testing::{FakeConnector, FakeSim};
    use crate::tools::builtin::testing;

    #[tokio::test]
    async fn test_collects_fields_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sim = FakeSim::default()
            .with("readers.vessel_info", Ok(json!({"name": "Probe"})))
            .with("readers.time_status", Ok(json!({"ut": 10.0})));
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::new(sim.clone())),
            ScriptConfig::default(),
        );

        let out = GetDiagnosticsTool::new(services)
            .execute(json!({"rpc_port": 6000}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out.result["vessel"], json!({"name": "Probe"}));
        assert_eq!(out.result["time"], json!({"ut": 10.0}));
        assert!(out.result["errors"]["orbit"].is_string());
        assert_eq!(out.result["target"]["rpc_port"], 6000);
        assert_eq!(*sim.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_external_error() {
        let dir = tempfile::tempdir().unwrap();
        let services = testing::services(
            dir.path(),
            Arc::new(FakeConnector::refusing()),
            ScriptConfig::default(),
        );

        let err = GetDiagnosticsTool::new(services)
            .execute(json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExternalService(_)));
    }
}
