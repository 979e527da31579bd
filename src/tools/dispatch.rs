//! Tool dispatch: timeout enforcement, error shaping, and message injection.

use std::sync::Arc;
use std::time::Duration;

use crate::injection::{InjectionStore, append_injection};
use crate::tools::registry::ToolRegistry;
use crate::tools::response::ToolResponse;
use crate::tools::tool::{ToolContext, ToolError};

/// Runs tool calls on behalf of a client.
///
/// Every call is bounded by `call_timeout`. Tool errors become error
/// responses rather than transport failures, and a pending injection message
/// for the caller's run is merged into whatever the tool returned.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    injections: Arc<InjectionStore>,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        injections: Arc<InjectionStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            injections,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Call a tool by name. `None` if no such tool is registered.
    pub async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Option<ToolResponse> {
        let tool = self.registry.get(name).await?;

        let mut response =
            match tokio::time::timeout(self.call_timeout, tool.execute(params, ctx)).await {
                Ok(Ok(output)) => {
                    tracing::debug!("Tool {} completed in {:?}", name, output.duration);
                    ToolResponse::from_output(output)
                }
                Ok(Err(e)) => {
                    tracing::warn!("Tool {} failed: {}", name, e);
                    ToolResponse::from_error(&e)
                }
                Err(_) => {
                    tracing::warn!("Tool {} timed out after {:?}", name, self.call_timeout);
                    ToolResponse::from_error(&ToolError::Timeout(self.call_timeout))
                }
            };

        if let Some(message) = self.injections.pop_for_call(&ctx.run_id).await {
            tracing::info!(run_id = %ctx.run_id, "Injecting queued message into {} result", name);
            append_injection(&mut response, &message);
        }

        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::injection::DEFAULT_RUN_ID;
    use crate::tools::tool::{Tool, ToolOutput};

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Sleeps for the requested milliseconds, or fails."
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"ms": {"type": "integer"}, "fail": {"type": "boolean"}}})
        }

        async fn execute(
            &self,
            params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            if params.get("fail").and_then(|v| v.as_bool()) == Some(true) {
                return Err(ToolError::ExecutionFailed("asked to fail".into()));
            }
            let ms = params.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolOutput::success(json!({"slept_ms": ms}), Duration::from_millis(ms)))
        }
    }

    async fn dispatcher(timeout: Duration) -> (ToolDispatcher, Arc<InjectionStore>) {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(Sleepy)).await;
        let injections = Arc::new(InjectionStore::new());
        (ToolDispatcher::new(registry, injections.clone(), timeout), injections)
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (dispatcher, _) = dispatcher(Duration::from_secs(1)).await;
        assert!(dispatcher.call("nope", json!({}), &ToolContext::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_success_without_injection() {
        let (dispatcher, _) = dispatcher(Duration::from_secs(1)).await;
        let response = dispatcher
            .call("sleepy", json!({"ms": 1}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!response.is_error);
        assert_eq!(response.structured, Some(json!({"slept_ms": 1})));
        assert!(!response.text().contains("User injection message"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_response() {
        let (dispatcher, _) = dispatcher(Duration::from_millis(20)).await;
        let response = dispatcher
            .call("sleepy", json!({"ms": 2000}), &ToolContext::default())
            .await
            .unwrap();
        assert!(response.is_error);
        assert_eq!(response.structured.unwrap()["ok"], false);
    }

    #[tokio::test]
    async fn test_injection_consumed_once_per_call() {
        let (dispatcher, injections) = dispatcher(Duration::from_secs(1)).await;
        injections.set_message("session-1", "abort the burn").await.unwrap();
        let ctx = ToolContext::new("session-1");

        let first = dispatcher.call("sleepy", json!({}), &ctx).await.unwrap();
        assert!(first.text().ends_with("User injection message: abort the burn"));

        let second = dispatcher.call("sleepy", json!({}), &ctx).await.unwrap();
        assert!(!second.text().contains("User injection message"));
    }

    #[tokio::test]
    async fn test_injection_applies_to_errors_and_default_fallback() {
        let (dispatcher, injections) = dispatcher(Duration::from_secs(1)).await;
        injections.set_message(DEFAULT_RUN_ID, "operator note").await.unwrap();

        let response = dispatcher
            .call("sleepy", json!({"fail": true}), &ToolContext::new("other-session"))
            .await
            .unwrap();
        assert!(response.is_error);
        assert!(response.text().contains("asked to fail"));
        assert!(response.text().ends_with("User injection message: operator note"));
        assert!(injections.pending_runs().await.is_empty());
    }
}
