//! Per-run FIFO queues of pending injection messages.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use crate::error::InjectionError;
use crate::injection::DEFAULT_RUN_ID;

/// Pending messages keyed by run id. Empty queues are removed.
#[derive(Debug, Default)]
pub struct InjectionStore {
    messages: Mutex<HashMap<String, VecDeque<String>>>,
}

impl InjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for a run. The message is stored trimmed.
    pub async fn set_message(&self, run_id: &str, message: &str) -> Result<(), InjectionError> {
        let normalized = message.trim();
        if normalized.is_empty() {
            return Err(InjectionError::EmptyMessage);
        }

        let mut messages = self.messages.lock().await;
        messages
            .entry(run_id.to_string())
            .or_default()
            .push_back(normalized.to_string());
        tracing::info!(run_id = %run_id, "Queued injection message");
        Ok(())
    }

    /// Take the oldest message queued for exactly this run.
    pub async fn pop_message(&self, run_id: &str) -> Option<String> {
        let mut messages = self.messages.lock().await;
        pop_locked(&mut messages, run_id)
    }

    /// Take the next message for a tool call made by `run_id`.
    ///
    /// The run's own queue has priority; when it is empty and the run is not
    /// the default run, the default run's queue is consulted.
    pub async fn pop_for_call(&self, run_id: &str) -> Option<String> {
        let mut messages = self.messages.lock().await;
        if let Some(message) = pop_locked(&mut messages, run_id) {
            return Some(message);
        }
        if run_id == DEFAULT_RUN_ID {
            return None;
        }
        let message = pop_locked(&mut messages, DEFAULT_RUN_ID)?;
        tracing::info!(
            run_id = %run_id,
            "Delivering default-run injection message to run without its own"
        );
        Some(message)
    }

    /// Run ids with at least one pending message.
    pub async fn pending_runs(&self) -> Vec<String> {
        let mut runs: Vec<String> = self.messages.lock().await.keys().cloned().collect();
        runs.sort();
        runs
    }
}

fn pop_locked(messages: &mut HashMap<String, VecDeque<String>>, run_id: &str) -> Option<String> {
    let queue = messages.get_mut(run_id)?;
    let message = queue.pop_front();
    if queue.is_empty() {
        messages.remove(run_id);
    }
    message
}
