//! Command-line interface.
//!
//! Flags override the built-in defaults; each flag can also be set through
//! a `SIMBRIDGE_*` environment variable (a `.env` file is honored).

mod config;

pub use config::{ConfigCommand, run_config_command};

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{ARTIFACT_DIR_ENV, Config};
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "simbridge", version, about = "Tool-calling bridge to a running flight simulation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address the HTTP server binds to
    #[arg(long, env = "SIMBRIDGE_HOST", global = true)]
    pub host: Option<String>,

    /// Port the HTTP server binds to
    #[arg(long, env = "SIMBRIDGE_PORT", global = true)]
    pub port: Option<u16>,

    /// Number of jobs that may run at once
    #[arg(long, env = "SIMBRIDGE_MAX_WORKERS", global = true)]
    pub max_workers: Option<usize>,

    /// Log lines kept per job (0 keeps everything)
    #[arg(long, env = "SIMBRIDGE_MAX_LOG_LINES", global = true)]
    pub max_log_lines: Option<usize>,

    /// Directory for job artifacts
    #[arg(long, env = ARTIFACT_DIR_ENV, global = true)]
    pub artifact_dir: Option<PathBuf>,

    /// Program that hosts the script runner
    #[arg(long, env = "SIMBRIDGE_RUNNER", global = true)]
    pub runner: Option<String>,

    /// Argument passed to the runner before its JSON configuration (repeatable)
    #[arg(long = "runner-arg", allow_hyphen_values = true, global = true)]
    pub runner_args: Vec<String>,

    /// Upper bound on a single tool call, in seconds
    #[arg(long, env = "SIMBRIDGE_CALL_TIMEOUT", global = true)]
    pub call_timeout: Option<f64>,

    /// Default simulation host
    #[arg(long, env = "SIMBRIDGE_SIM_ADDRESS", global = true)]
    pub sim_address: Option<String>,

    /// Default simulation RPC port
    #[arg(long, env = "SIMBRIDGE_SIM_RPC_PORT", global = true)]
    pub sim_rpc_port: Option<u16>,

    /// Default simulation stream port
    #[arg(long, env = "SIMBRIDGE_SIM_STREAM_PORT", global = true)]
    pub sim_stream_port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SIMBRIDGE_LOG_JSON", global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server (default if no command given)
    Serve,

    /// Print every tool's schema as JSON
    Tools,

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Apply flags on top of the defaults and validate the result.
    pub fn to_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(host) = &self.host {
            config.http.host = host.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(n) = self.max_workers {
            config.jobs.max_workers = n;
        }
        if let Some(n) = self.max_log_lines {
            config.jobs.max_log_lines = n;
        }
        if let Some(dir) = &self.artifact_dir {
            config.jobs.artifact_dir = dir.clone();
        }
        if let Some(runner) = &self.runner {
            config.script.runner_program = runner.clone();
            config.script.runner_args = self.runner_args.clone();
        } else if !self.runner_args.is_empty() {
            config.script.runner_args = self.runner_args.clone();
        }
        if let Some(secs) = self.call_timeout {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Invalid {
                    key: "tools.call_timeout".to_string(),
                    reason: "must be a positive number of seconds".to_string(),
                });
            }
            config.tools.call_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(address) = &self.sim_address {
            config.sim.default_target.address = address.clone();
        }
        if let Some(port) = self.sim_rpc_port {
            config.sim.default_target.rpc_port = port;
        }
        if let Some(port) = self.sim_stream_port {
            config.sim.default_target.stream_port = port;
        }

        config.validate()?;
        Ok(config)
    }
}
