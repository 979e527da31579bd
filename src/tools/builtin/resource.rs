//! Reading job artifacts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ArtifactError;
use crate::jobs::JobArtifactStore;
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, require_str};

/// Returns the artifact behind a `resource://jobs/<id>.json` locator.
pub struct ReadResourceTool {
    artifacts: Arc<JobArtifactStore>,
}

impl ReadResourceTool {
    pub fn new(artifacts: Arc<JobArtifactStore>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl Tool for ReadResourceTool {
    fn name(&self) -> &str {
        "read_resource"
    }

    fn description(&self) -> &str {
        "Read a job result by its result_resource locator (resource://jobs/<job_id>.json)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "uri": {
                    "type": "string",
                    "description": "Locator from a job's result_resource"
                }
            },
            "required": ["uri"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let uri = require_str(&params, "uri")?;

        let text = self.artifacts.read_resource(uri).map_err(|e| match e {
            ArtifactError::InvalidLocator(_) => ToolError::InvalidParameters(e.to_string()),
            other => ToolError::ExecutionFailed(other.to_string()),
        })?;

        let result = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}
