//! Durable JSON artifacts for finished jobs, addressed by resource locator.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ArtifactError;
use crate::util::utc_timestamp;

/// Locator prefix for job artifacts: `resource://jobs/<job_id>.json`.
pub const JOB_RESOURCE_PREFIX: &str = "resource://jobs/";

/// Locator for a job's artifact.
pub fn resource_uri(job_id: &str) -> String {
    format!("{}{}.json", JOB_RESOURCE_PREFIX, job_id)
}

/// Extract the job id from a locator, accepting either the full
/// `resource://jobs/<id>.json` form or a bare `<id>.json` file name.
pub fn job_id_from_locator(locator: &str) -> Result<&str, ArtifactError> {
    let name = locator.strip_prefix(JOB_RESOURCE_PREFIX).unwrap_or(locator);
    let id = name.strip_suffix(".json").unwrap_or(name);
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(ArtifactError::InvalidLocator(locator.to_string()))
    }
}

/// Envelope written for every job artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub job_id: String,
    pub kind: String,
    pub requested_at: String,
    pub params: Value,
    pub result: Value,
}

impl ArtifactPayload {
    pub fn new(job_id: &str, kind: &str, params: Value, result: Value) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            requested_at: utc_timestamp(),
            params,
            result,
        }
    }
}

/// Stores one JSON document per job under a root directory.
#[derive(Debug, Clone)]
pub struct JobArtifactStore {
    root: PathBuf,
}

impl JobArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", job_id))
    }

    /// Write `payload` as pretty, key-sorted JSON and return its path.
    ///
    /// The document is written to a sibling temp file and renamed into place,
    /// so readers never observe a half-written artifact.
    pub fn save<T: Serialize>(&self, job_id: &str, payload: &T) -> Result<PathBuf, ArtifactError> {
        job_id_from_locator(job_id)?;
        let path = self.path_for(job_id);

        // Round-trip through Value so object keys come out sorted.
        let document = serde_json::to_string_pretty(&serde_json::to_value(payload)?)?;

        fs::create_dir_all(&self.root).map_err(|source| ArtifactError::Write {
            path: self.root.clone(),
            source,
        })?;

        let tmp = self.root.join(format!(".{}.json.tmp", job_id));
        fs::write(&tmp, document.as_bytes()).map_err(|source| ArtifactError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(job_id = %job_id, "Artifact written to {}", path.display());
        Ok(path)
    }

    /// Raw artifact text, or `None` if no artifact exists for the id.
    pub fn load(&self, job_id: &str) -> Result<Option<String>, ArtifactError> {
        let path = self.path_for(job_id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Read { path, source }),
        }
    }

    /// Resolve a locator to its artifact text.
    ///
    /// A missing artifact yields a JSON error document instead of an error so
    /// clients can treat every resource read uniformly.
    pub fn read_resource(&self, locator: &str) -> Result<String, ArtifactError> {
        let job_id = job_id_from_locator(locator)?;
        match self.load(job_id)? {
            Some(text) => Ok(text),
            None => Ok(serde_json::json!({
                "error": format!("Artifact for job {} not found.", job_id)
            })
            .to_string()),
        }
    }
}
