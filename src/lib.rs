//! Tool-calling bridge between an agent and a running flight simulation.
//!
//! Long or blocking work runs as background jobs: the agent starts a job,
//! polls its status and logs, and reads the result as a resource once it
//! finishes. User scripts run in a supervised child process with a
//! cooperative soft timeout and an enforced hard timeout. Operators can
//! queue messages that are delivered inside the agent's next tool result.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod injection;
pub mod jobs;
pub mod script;
pub mod server;
pub mod sim;
pub mod tools;

pub(crate) mod util;
