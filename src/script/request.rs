//! Parameters of a script run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sim::SimTarget;

/// A script plus the target and policy it runs under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptRequest {
    pub code: String,
    #[serde(flatten)]
    pub target: SimTarget,
    /// Cooperative limit enforced by the runner itself.
    pub timeout_sec: Option<f64>,
    /// Watchdog limit enforced by the parent; the runner is killed past it.
    pub hard_timeout_sec: Option<f64>,
    pub pause_on_end: bool,
    pub unpause_on_start: bool,
    pub allow_imports: bool,
}

/// Wire form of [`ScriptRequest`]; missing connection fields fall back to
/// configured defaults.
#[derive(Debug, Deserialize)]
struct ScriptParams {
    code: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    rpc_port: Option<u16>,
    #[serde(default)]
    stream_port: Option<u16>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timeout_sec: Option<f64>,
    #[serde(default)]
    hard_timeout_sec: Option<f64>,
    #[serde(default = "default_true")]
    pause_on_end: bool,
    #[serde(default = "default_true")]
    unpause_on_start: bool,
    #[serde(default)]
    allow_imports: bool,
}

fn default_true() -> bool {
    true
}

impl ScriptRequest {
    pub fn new(code: impl Into<String>, target: SimTarget) -> Self {
        Self {
            code: code.into(),
            target,
            timeout_sec: None,
            hard_timeout_sec: None,
            pause_on_end: true,
            unpause_on_start: true,
            allow_imports: false,
        }
    }

    /// Parse tool-call parameters.
    pub fn from_params(
        params: &serde_json::Value,
        defaults: &SimTarget,
    ) -> Result<Self, serde_json::Error> {
        let p: ScriptParams = serde_json::from_value(params.clone())?;
        Ok(Self {
            code: p.code,
            target: SimTarget {
                address: p.address.unwrap_or_else(|| defaults.address.clone()),
                rpc_port: p.rpc_port.unwrap_or(defaults.rpc_port),
                stream_port: p.stream_port.unwrap_or(defaults.stream_port),
                name: p.name.or_else(|| defaults.name.clone()),
            },
            timeout_sec: p.timeout_sec,
            hard_timeout_sec: p.hard_timeout_sec,
            pause_on_end: p.pause_on_end,
            unpause_on_start: p.unpause_on_start,
            allow_imports: p.allow_imports,
        })
    }

    pub fn with_timeouts(mut self, soft: Option<f64>, hard: Option<f64>) -> Self {
        self.timeout_sec = soft;
        self.hard_timeout_sec = hard;
        self
    }

    /// Soft limit as sent to the runner; non-positive means none.
    pub fn soft_timeout(&self) -> Option<f64> {
        self.timeout_sec.filter(|t| *t > 0.0)
    }

    /// Watchdog duration; non-positive, non-finite or unrepresentable
    /// values mean none.
    pub fn hard_timeout(&self) -> Option<Duration> {
        self.hard_timeout_sec
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}
