//! HTTP endpoint for queueing injection messages.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::injection::InjectionStore;

/// `POST /runs/{run_id}/inject` with body `{"message": "..."}`.
pub fn routes(store: Arc<InjectionStore>) -> Router {
    Router::new()
        .route("/runs/{run_id}/inject", post(inject_message))
        .with_state(store)
}

async fn inject_message(
    State(store): State<Arc<InjectionStore>>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return bad_request("invalid JSON"),
    };

    let Some(message) = payload.get("message").and_then(Value::as_str) else {
        return bad_request("message must be a non-empty string");
    };
    if store.set_message(&run_id, message).await.is_err() {
        return bad_request("message must be a non-empty string");
    }

    Json(json!({"status": "queued", "run_id": run_id})).into_response()
}

fn bad_request(error: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": error}))).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    async fn post_inject(store: Arc<InjectionStore>, run_id: &str, body: &str) -> (StatusCode, Value) {
        let response = routes(store)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/runs/{}/inject", run_id))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_queue_message() {
        let store = Arc::new(InjectionStore::new());
        let (status, body) = post_inject(store.clone(), "run-7", r#"{"message": " hold "}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "queued", "run_id": "run-7"}));
        assert_eq!(store.pop_message("run-7").await.as_deref(), Some("hold"));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let store = Arc::new(InjectionStore::new());
        let (status, body) = post_inject(store, "run", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid JSON"}));
    }

    #[tokio::test]
    async fn test_bad_message() {
        let store = Arc::new(InjectionStore::new());
        for body in [r#"{"message": "   "}"#, r#"{"message": 5}"#, r#"{}"#, r#"[1, 2]"#] {
            let (status, value) = post_inject(store.clone(), "run", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(value, json!({"error": "message must be a non-empty string"}));
        }
        assert!(store.pending_runs().await.is_empty());
    }
}
