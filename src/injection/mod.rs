//! Out-of-band operator messages delivered inside tool results.
//!
//! An operator posts a note for a run; the next tool call made by that run
//! carries the note appended to its result.

mod routes;
mod store;

pub use routes::routes;
pub use store::InjectionStore;

use axum::http::HeaderMap;

use crate::tools::{ContentBlock, ToolResponse};

/// Run id used when a call carries no session header.
pub const DEFAULT_RUN_ID: &str = "default";

/// Header identifying the caller's session.
pub const RUN_ID_HEADER: &str = "mcp-session-id";

/// Run id for a request: its session header, or the default run.
pub fn run_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(RUN_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_RUN_ID)
        .to_string()
}

/// Merge an injected message into a tool response.
///
/// The note is folded into the first text block so clients that only read
/// one string still see it; a new block is added when there is none.
pub fn append_injection(response: &mut ToolResponse, message: &str) {
    let note = format!("User injection message: {}", message);
    match response.content.first_mut() {
        Some(ContentBlock::Text { text }) => {
            text.push_str("\n\n");
            text.push_str(&note);
        }
        None => response.content.push(ContentBlock::Text {
            text: format!("\n\n{}", note),
        }),
    }
}
