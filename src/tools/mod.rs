//! Tool system.
//!
//! Tools are the agent's interface to the simulation and the job engine.
//! They can:
//! - Run scripts, synchronously or as background jobs
//! - Start reader jobs for large data walks
//! - Poll, list and cancel jobs
//! - Read finished job artifacts

pub mod blocking;
pub mod builtin;

mod dispatch;
mod registry;
mod response;
mod tool;

pub use blocking::{Cleanup, run_blocking};
pub use builtin::{ToolServices, register_builtin_tools};
pub use dispatch::ToolDispatcher;
pub use registry::ToolRegistry;
pub use response::{ContentBlock, ToolResponse};
pub use tool::{Tool, ToolContext, ToolError, ToolOutput, ToolSchema};
