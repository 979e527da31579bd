//! Parsing of the runner's stdout and stderr.
//!
//! The runner prints the script's own output, then one metadata line of the
//! form `__SIMBRIDGE_META__ {json}`. A script may print a `SUMMARY:` block
//! that becomes the run's summary.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::script::result::ScriptErrorInfo;
use crate::util::tail_chars;

pub const META_MARKER: &str = "__SIMBRIDGE_META__";
const SUMMARY_MARKER: &str = "SUMMARY:";
const TRACEBACK_LIMIT: usize = 4000;

static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*(?:Error|Exception|Interrupt|Exit|Timeout))(?::\s*(.*))?$")
        .expect("EXCEPTION_LINE is a valid regex")
});

static LINE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"line (\d+)").expect("LINE_REF is a valid regex"));

/// Metadata the runner reports about the run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RunnerMeta {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub paused: Option<bool>,
    #[serde(default)]
    pub unpaused: Option<bool>,
    #[serde(default)]
    pub exec_time_s: Option<f64>,
    #[serde(default)]
    pub pre_pause_flight: Option<Value>,
    #[serde(default)]
    pub error: Option<ScriptErrorInfo>,
}

/// Remove metadata lines from stdout. The last parsable one wins; lines that
/// carry the marker but fail to parse are left in place.
pub fn split_stdout_and_meta(stdout: &str) -> (String, Option<RunnerMeta>) {
    let mut kept = String::with_capacity(stdout.len());
    let mut meta = None;
    for line in stdout.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = bare.trim_start().strip_prefix(META_MARKER) {
            match serde_json::from_str::<RunnerMeta>(rest.trim()) {
                Ok(parsed) => {
                    meta = Some(parsed);
                    continue;
                }
                Err(e) => tracing::debug!("Ignoring malformed runner metadata: {}", e),
            }
        }
        kept.push_str(line);
    }
    (kept, meta)
}

/// Text of the last `SUMMARY:` block: the rest of the marker line plus the
/// lines that follow it, up to the first blank line.
///
/// Scripts that report progress emit several blocks; the last one describes
/// the state the script ended in, so it is the one returned.
pub fn parse_summary(stdout: &str) -> Option<String> {
    let lines: Vec<&str> = stdout.lines().collect();
    let start = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with(SUMMARY_MARKER))?;

    let mut block = Vec::new();
    let head = lines[start].trim_start()[SUMMARY_MARKER.len()..].trim();
    if !head.is_empty() {
        block.push(head);
    }
    for line in &lines[start + 1..] {
        if line.trim().is_empty() {
            if block.is_empty() {
                continue;
            }
            break;
        }
        block.push(line.trim_end());
    }

    if block.is_empty() {
        None
    } else {
        Some(block.join("\n"))
    }
}

/// Best-effort structured error from a traceback-style stderr.
///
/// Takes the last unindented `Name: message` line whose name looks like an
/// exception, the last `line N` reference, and the tail of stderr.
pub fn extract_error_from_stderr(stderr: &str) -> ScriptErrorInfo {
    let exception = stderr
        .lines()
        .rev()
        .filter(|l| !l.starts_with([' ', '\t']))
        .find_map(|l| EXCEPTION_LINE.captures(l.trim_end()));

    let line = LINE_REF
        .captures_iter(stderr)
        .last()
        .and_then(|c| c[1].parse::<u32>().ok());

    let info = match exception {
        Some(caps) => {
            let full = &caps[1];
            let kind = full.rsplit('.').next().unwrap_or(full);
            let message = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            ScriptErrorInfo::new(kind, message)
        }
        None => {
            let last = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("script failed without output");
            ScriptErrorInfo::new("ScriptError", last)
        }
    };

    info.with_line(line)
        .with_traceback(tail_chars(stderr.trim_end(), TRACEBACK_LIMIT))
}
