//! Structured outcome of a script run.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sim::SimTarget;

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(from|import)\b").expect("IMPORT_LINE is a valid regex")
});

pub const FOLLOW_UP_HINT: &str = "Hint: call get_diagnostics to capture a rich paused-state snapshot and investigate why the script failed or timed out.";

/// What went wrong, in a form an agent can act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptErrorInfo {
    #[serde(alias = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ScriptErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            line: None,
            traceback: None,
        }
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn cancelled() -> Self {
        Self::new("Cancelled", "Job cancelled by user")
    }

    pub fn hard_timeout() -> Self {
        Self::new("TimeoutError", "Hard timeout reached")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub exec_time_s: Option<f64>,
}

/// Cheap facts about the submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStats {
    pub line_count: usize,
    pub has_imports: bool,
}

impl CodeStats {
    pub fn of(code: &str) -> Self {
        Self {
            line_count: code.matches('\n').count() + 1,
            has_imports: IMPORT_LINE.is_match(code),
        }
    }
}

/// Suggested next call after a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub suggest_get_diagnostics: bool,
    pub message: String,
    pub tool: String,
    pub params: Value,
}

impl FollowUp {
    pub fn diagnostics(target: &SimTarget) -> Self {
        Self {
            suggest_get_diagnostics: true,
            message: FOLLOW_UP_HINT.to_string(),
            tool: "get_diagnostics".to_string(),
            params: target.to_params(),
        }
    }
}

/// Everything known about one script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResult {
    pub ok: bool,
    pub summary: Option<String>,
    pub transcript: String,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ScriptErrorInfo>,
    pub paused: Option<bool>,
    pub unpaused: Option<bool>,
    pub timing: Timing,
    pub pre_pause_flight: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
    pub code_stats: CodeStats,
}

impl ScriptResult {
    /// Result for a run that never got as far as a live process.
    pub fn not_started(error: ScriptErrorInfo, code_stats: CodeStats) -> Self {
        Self {
            ok: false,
            summary: None,
            transcript: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
            paused: None,
            unpaused: None,
            timing: Timing::default(),
            pre_pause_flight: None,
            diagnostics: None,
            follow_up: None,
            code_stats,
        }
    }

    /// Force the result into the cancelled shape, whatever the process did.
    pub fn mark_cancelled(&mut self) {
        self.ok = false;
        self.error = Some(ScriptErrorInfo::cancelled());
    }

    /// Attach the diagnostics hint when the run did not succeed.
    pub fn attach_follow_up(&mut self, target: &SimTarget) {
        if !self.ok {
            self.follow_up = Some(FollowUp::diagnostics(target));
        }
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}
