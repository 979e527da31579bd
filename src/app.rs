//! Wiring: builds the job engine, tool layer and routes from a [`Config`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::injection::{self, InjectionStore};
use crate::jobs::{JobArtifactStore, JobRegistry};
use crate::script::ScriptRunner;
use crate::server::{HttpServer, HttpServerConfig};
use crate::sim::SimConnector;
use crate::tools::{ToolDispatcher, ToolRegistry, ToolServices, register_builtin_tools};

/// Reason recorded on jobs still active when the server stops.
pub const SHUTDOWN_CANCEL_REASON: &str = "Server shutting down.";

/// The assembled application.
pub struct App {
    pub config: Config,
    pub jobs: Arc<JobRegistry>,
    pub artifacts: Arc<JobArtifactStore>,
    pub injections: Arc<InjectionStore>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl App {
    /// Validate `config` and build every component.
    pub async fn build(config: Config, connector: Arc<dyn SimConnector>) -> anyhow::Result<Self> {
        config.validate()?;

        let jobs = Arc::new(JobRegistry::from_config(&config.jobs)?);
        let artifacts = Arc::new(JobArtifactStore::new(config.jobs.artifact_dir.clone()));
        let runner = Arc::new(ScriptRunner::new(config.script.clone(), connector.clone()));
        let services = ToolServices {
            jobs: jobs.clone(),
            artifacts: artifacts.clone(),
            runner,
            connector,
            sim: config.sim.clone(),
        };

        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry, &services).await;

        let injections = Arc::new(InjectionStore::new());
        let dispatcher = Arc::new(ToolDispatcher::new(
            registry,
            injections.clone(),
            config.tools.call_timeout,
        ));

        tracing::info!(
            "Built app: {} workers, artifacts in {}",
            config.jobs.max_workers,
            config.jobs.artifact_dir.display()
        );

        Ok(Self {
            config,
            jobs,
            artifacts,
            injections,
            dispatcher,
        })
    }

    /// Every route fragment the server hosts.
    pub fn routes(&self) -> Vec<Router> {
        vec![
            api::routes(ApiState {
                dispatcher: self.dispatcher.clone(),
                artifacts: self.artifacts.clone(),
            }),
            injection::routes(self.injections.clone()),
        ]
    }

    /// An HTTP server bound to the configured address with all routes added.
    pub fn server(&self) -> anyhow::Result<HttpServer> {
        let addr: SocketAddr = format!("{}:{}", self.config.http.host, self.config.http.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
        let mut server = HttpServer::new(HttpServerConfig { addr });
        for fragment in self.routes() {
            server.add_routes(fragment);
        }
        Ok(server)
    }

    /// Cancel active jobs and join the workers. Blocking.
    pub fn shutdown(&self) {
        let active: Vec<String> = self
            .jobs
            .list_jobs()
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.job_id)
            .collect();
        if !active.is_empty() {
            tracing::info!("Cancelling {} active jobs", active.len());
        }
        for job_id in &active {
            self.jobs.cancel_job(job_id, Some(SHUTDOWN_CANCEL_REASON));
        }
        self.jobs.shutdown(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::JobsConfig;
    use crate::jobs::{JobMetadata, JobStatus};
    use crate::sim::DisconnectedConnector;
    use crate::tools::ToolContext;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            jobs: JobsConfig::default().with_max_workers(1).with_artifact_dir(dir),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_build_registers_tools() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(config(dir.path()), Arc::new(DisconnectedConnector))
            .await
            .unwrap();
        assert_eq!(app.dispatcher.registry().count().await, 9);
        assert_eq!(app.routes().len(), 2);

        let response = app
            .dispatcher
            .call("get_diagnostics", json!({}), &ToolContext::default())
            .await
            .unwrap();
        assert!(response.is_error);
        assert!(response.text().contains("Simulation client unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.jobs.max_workers = 0;
        assert!(App::build(config, Arc::new(DisconnectedConnector)).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(config(dir.path()), Arc::new(DisconnectedConnector))
            .await
            .unwrap();

        let running = app
            .jobs
            .create_job(
                |h| {
                    while !h.is_cancel_requested() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                },
                JobMetadata::new(),
            )
            .unwrap();
        let queued = app.jobs.create_job(|_| Ok(()), JobMetadata::new()).unwrap();

        let app = Arc::new(app);
        let shutting = app.clone();
        tokio::task::spawn_blocking(move || shutting.shutdown())
            .await
            .unwrap();

        for id in [&running, &queued] {
            let snapshot = app.jobs.get_state(id).unwrap();
            assert_eq!(snapshot.status, JobStatus::Cancelled);
            assert_eq!(snapshot.error.as_deref(), Some(SHUTDOWN_CANCEL_REASON));
        }
    }
}
