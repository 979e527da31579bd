//! Sandboxed execution of agent-written scripts against the simulation.

mod output;
mod request;
mod result;
mod runner;

pub use output::{
    META_MARKER, RunnerMeta, extract_error_from_stderr, parse_summary, split_stdout_and_meta,
};
pub use request::ScriptRequest;
pub use result::{CodeStats, FOLLOW_UP_HINT, FollowUp, ScriptErrorInfo, ScriptResult, Timing};
pub use runner::{DetachedRun, RunObserver, ScriptRunner};
