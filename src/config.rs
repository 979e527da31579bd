//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sim::SimTarget;

/// Environment variable that overrides the artifact directory.
pub const ARTIFACT_DIR_ENV: &str = "SIMBRIDGE_ARTIFACT_DIR";

/// Top-level configuration assembled from CLI flags and environment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub http: HttpConfig,
    pub jobs: JobsConfig,
    pub script: ScriptConfig,
    pub tools: ToolsConfig,
    pub sim: SimConfig,
}

impl Config {
    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.max_workers == 0 {
            return Err(invalid("jobs.max_workers", "must be at least 1"));
        }
        if self.tools.call_timeout.is_zero() {
            return Err(invalid("tools.call_timeout", "must be greater than zero"));
        }
        if self.script.runner_program.trim().is_empty() {
            return Err(invalid("script.runner_program", "must not be empty"));
        }
        if self.script.script_file_name.contains(['/', '\\']) {
            return Err(invalid(
                "script.script_file_name",
                "must be a bare file name",
            ));
        }
        Ok(())
    }

    /// Every setting as `(path, value)`, in display order.
    pub fn list(&self) -> Vec<(String, String)> {
        let secs = |d: Duration| format!("{}s", d.as_secs_f64());
        let target = &self.sim.default_target;
        vec![
            ("http.host".into(), self.http.host.clone()),
            ("http.port".into(), self.http.port.to_string()),
            ("jobs.max_workers".into(), self.jobs.max_workers.to_string()),
            ("jobs.max_log_lines".into(), self.jobs.max_log_lines.to_string()),
            (
                "jobs.artifact_dir".into(),
                self.jobs.artifact_dir.display().to_string(),
            ),
            (
                "script.runner_program".into(),
                self.script.runner_program.clone(),
            ),
            (
                "script.runner_args".into(),
                self.script.runner_args.join(" "),
            ),
            (
                "script.script_file_name".into(),
                self.script.script_file_name.clone(),
            ),
            (
                "script.diagnostics_timeout".into(),
                secs(self.script.diagnostics_timeout),
            ),
            ("tools.call_timeout".into(), secs(self.tools.call_timeout)),
            ("sim.address".into(), target.address.clone()),
            ("sim.rpc_port".into(), target.rpc_port.to_string()),
            ("sim.stream_port".into(), target.stream_port.to_string()),
            (
                "sim.connect_timeout".into(),
                secs(self.sim.connect_timeout()),
            ),
        ]
    }

    /// Value of one setting by path.
    pub fn get(&self, path: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(key, _)| key == path)
            .map(|(_, value)| value)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

/// Job registry and artifact settings.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Number of jobs allowed to run at once.
    pub max_workers: usize,
    /// Log lines kept per job before the oldest are dropped (0 = unbounded).
    pub max_log_lines: usize,
    /// Directory holding `<job_id>.json` artifacts.
    pub artifact_dir: PathBuf,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_log_lines: 10_000,
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl JobsConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_max_log_lines(mut self, max_log_lines: usize) -> Self {
        self.max_log_lines = max_log_lines;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }
}

/// `$SIMBRIDGE_ARTIFACT_DIR` if set, else `./artifacts/jobs`.
pub fn default_artifact_dir() -> PathBuf {
    match std::env::var_os(ARTIFACT_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("artifacts").join("jobs"),
    }
}

/// How user scripts are launched.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Interpreter or wrapper executable that hosts the runner.
    pub runner_program: String,
    /// Arguments placed before the JSON configuration argument.
    pub runner_args: Vec<String>,
    /// File name the user code is staged under.
    pub script_file_name: String,
    /// Connect timeout used when collecting diagnostics after a hard timeout.
    pub diagnostics_timeout: Duration,
    /// How often the runner polls the child process.
    pub poll_interval: Duration,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            runner_program: "python3".to_string(),
            runner_args: vec!["-m".to_string(), "sim_runner".to_string()],
            script_file_name: "user_code.py".to_string(),
            diagnostics_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl ScriptConfig {
    pub fn with_runner(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.runner_program = program.into();
        self.runner_args = args;
        self
    }

    pub fn with_script_file_name(mut self, name: impl Into<String>) -> Self {
        self.script_file_name = name.into();
        self
    }

    pub fn with_diagnostics_timeout(mut self, timeout: Duration) -> Self {
        self.diagnostics_timeout = timeout;
        self
    }
}

/// Tool dispatch settings.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Upper bound on a single tool call.
    pub call_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Simulation connection defaults.
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Target used when a tool call omits connection parameters.
    pub default_target: SimTarget,
    /// Connect timeout for reader tools and jobs.
    pub connect_timeout: Option<Duration>,
}

impl SimConfig {
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(Duration::from_secs(5))
    }
}
