//! Runs user scripts in a child process under a soft and a hard timeout.
//!
//! The child gets one argument: a JSON document naming the staged code file,
//! the simulation target and the run policy. Its output is relayed line by
//! line to a [`RunObserver`] while it runs. Past the hard timeout the parent
//! kills it and gathers a best-effort diagnostics snapshot.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ScriptConfig;
use crate::jobs::{JobHandle, LogStreamKind};
use crate::script::output::{extract_error_from_stderr, parse_summary, split_stdout_and_meta};
use crate::script::request::ScriptRequest;
use crate::script::result::{CodeStats, ScriptErrorInfo, ScriptResult, Timing};
use crate::sim::{
    Reader, Session, SimConnector, SimControl, collect_diagnostics, flight_snapshot, time_status,
    vessel_info,
};
use crate::util::lock_unpoisoned;

/// How long to wait for the output readers once the child has exited.
const READER_GRACE: Duration = Duration::from_millis(500);
/// Shorter grace after a kill; a surviving grandchild may hold the pipes.
const KILLED_READER_GRACE: Duration = Duration::from_millis(200);

/// Fields read after a hard timeout; kept short since the connection is
/// opened under a tight timeout.
const TIMEOUT_DIAGNOSTIC_FIELDS: &[(&str, Reader)] = &[("vessel", vessel_info), ("time", time_status)];

type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// Receives progress from a running script.
pub trait RunObserver: Send + Sync {
    /// One line of child output.
    fn on_output(&self, stream: LogStreamKind, line: &str);

    /// A lifecycle note from the runner itself.
    fn on_event(&self, message: &str);

    /// Install the action that stops the child.
    fn register_cancel(&self, cancel: CancelFn);

    fn is_cancel_requested(&self) -> bool;
}

impl RunObserver for JobHandle {
    fn on_output(&self, stream: LogStreamKind, line: &str) {
        self.log(format!("[execute_script:{}] {}", stream.as_str(), line));
    }

    fn on_event(&self, message: &str) {
        self.log(message);
    }

    fn register_cancel(&self, cancel: CancelFn) {
        self.register_cancel_callback(cancel);
    }

    fn is_cancel_requested(&self) -> bool {
        JobHandle::is_cancel_requested(self)
    }
}

/// Observer for runs that are not backed by a job.
///
/// Output goes to tracing; [`DetachedRun::cancel`] stops the child.
#[derive(Default)]
pub struct DetachedRun {
    cancel: Mutex<Option<CancelFn>>,
    requested: AtomicBool,
}

impl DetachedRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the child, now or as soon as it starts.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let cancel = lock_unpoisoned(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl RunObserver for DetachedRun {
    fn on_output(&self, stream: LogStreamKind, line: &str) {
        tracing::debug!("[execute_script:{}] {}", stream.as_str(), line);
    }

    fn on_event(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn register_cancel(&self, cancel: CancelFn) {
        if self.requested.load(Ordering::SeqCst) {
            cancel();
            return;
        }
        *lock_unpoisoned(&self.cancel) = Some(cancel);
    }

    fn is_cancel_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// JSON handed to the runner as its only argument.
#[derive(Serialize)]
struct RunnerPayload<'a> {
    code_path: &'a Path,
    address: &'a str,
    rpc_port: u16,
    stream_port: u16,
    name: Option<&'a str>,
    timeout_sec: Option<f64>,
    allow_imports: bool,
    pause_on_end: bool,
    unpause_on_start: bool,
}

/// Launches scripts and supervises them.
pub struct ScriptRunner {
    config: ScriptConfig,
    connector: Arc<dyn SimConnector>,
    control: SimControl,
}

impl ScriptRunner {
    pub fn new(config: ScriptConfig, connector: Arc<dyn SimConnector>) -> Self {
        Self {
            config,
            connector,
            control: SimControl::default(),
        }
    }

    pub fn with_control(mut self, control: SimControl) -> Self {
        self.control = control;
        self
    }

    /// Run a script to completion, hard timeout or cancellation. Blocking.
    ///
    /// Never fails: launch problems, crashes and timeouts are all reported in
    /// the returned [`ScriptResult`].
    pub fn run(&self, request: &ScriptRequest, observer: Arc<dyn RunObserver>) -> ScriptResult {
        let code_stats = CodeStats::of(&request.code);

        if observer.is_cancel_requested() {
            let mut result = ScriptResult::not_started(ScriptErrorInfo::cancelled(), code_stats);
            result.attach_follow_up(&request.target);
            return result;
        }

        let staging = match tempfile::Builder::new().prefix("simbridge_exec_").tempdir() {
            Ok(dir) => dir,
            Err(e) => return launch_failure(request, &e, code_stats),
        };
        let code_path = staging.path().join(&self.config.script_file_name);
        if let Err(e) = std::fs::write(&code_path, request.code.as_bytes()) {
            return launch_failure(request, &e, code_stats);
        }

        let payload = RunnerPayload {
            code_path: &code_path,
            address: &request.target.address,
            rpc_port: request.target.rpc_port,
            stream_port: request.target.stream_port,
            name: request.target.name.as_deref(),
            timeout_sec: request.soft_timeout(),
            allow_imports: request.allow_imports,
            pause_on_end: request.pause_on_end,
            unpause_on_start: request.unpause_on_start,
        };
        let payload = match serde_json::to_string(&payload) {
            Ok(p) => p,
            Err(e) => {
                let error = ScriptErrorInfo::new("SerializationError", e.to_string());
                return ScriptResult::not_started(error, code_stats);
            }
        };

        let hard_timeout = request.hard_timeout();
        let started = Instant::now();
        let mut child = match Command::new(&self.config.runner_program)
            .args(&self.config.runner_args)
            .arg(&payload)
            .current_dir(staging.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return launch_failure(request, &e, code_stats),
        };
        tracing::debug!(
            "Script runner started (pid {}) against {}",
            child.id(),
            request.target
        );

        let stdout = child
            .stdout
            .take()
            .map(|pipe| OutputReader::spawn(pipe, LogStreamKind::Stdout, Arc::clone(&observer)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| OutputReader::spawn(pipe, LogStreamKind::Stderr, Arc::clone(&observer)));

        let child = Arc::new(Mutex::new(child));
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let child = Arc::clone(&child);
            let cancelled = Arc::clone(&cancelled);
            let events = Arc::clone(&observer);
            observer.register_cancel(Box::new(move || {
                cancelled.store(true, Ordering::SeqCst);
                events.on_event("[execute_script] cancellation requested");
                if let Err(e) = lock_unpoisoned(&child).kill() {
                    tracing::debug!("Kill after cancellation failed: {}", e);
                }
            }));
        }

        let exit = self.supervise(&child, hard_timeout, started);

        let mut result = match exit {
            Exit::Exited(status) => {
                let stdout = OutputReader::finish(stdout, READER_GRACE);
                let stderr = OutputReader::finish(stderr, READER_GRACE);
                completed_result(status, stdout, stderr, started.elapsed(), code_stats)
            }
            Exit::HardTimeout(limit) => {
                tracing::warn!(
                    "Script exceeded hard timeout of {:?}; runner killed",
                    limit
                );
                let stdout = OutputReader::finish(stdout, KILLED_READER_GRACE);
                let stderr = OutputReader::finish(stderr, KILLED_READER_GRACE);
                let (diagnostics, pre_pause_flight, paused) = self.capture_diagnostics(request);
                hard_timeout_result(
                    request.hard_timeout_sec.unwrap_or(limit.as_secs_f64()),
                    stdout,
                    stderr,
                    diagnostics,
                    pre_pause_flight,
                    paused,
                    code_stats,
                )
            }
            Exit::Lost(reason) => {
                tracing::warn!("Lost track of script runner: {}", reason);
                let stdout = OutputReader::finish(stdout, KILLED_READER_GRACE);
                let stderr = OutputReader::finish(stderr, KILLED_READER_GRACE);
                lost_result(reason, stdout, stderr, started.elapsed(), code_stats)
            }
        };

        if cancelled.load(Ordering::SeqCst) {
            result.mark_cancelled();
        }
        result.attach_follow_up(&request.target);
        result
    }

    /// Poll the child until it exits, the hard deadline passes, or waiting
    /// fails.
    fn supervise(
        &self,
        child: &Mutex<Child>,
        hard_timeout: Option<Duration>,
        started: Instant,
    ) -> Exit {
        loop {
            match lock_unpoisoned(child).try_wait() {
                Ok(Some(status)) => return Exit::Exited(status),
                Ok(None) => {}
                Err(e) => return Exit::Lost(format!("failed to wait for runner: {}", e)),
            }

            if let Some(limit) = hard_timeout
                && started.elapsed() >= limit
            {
                let mut child = lock_unpoisoned(child);
                if let Err(e) = child.kill() {
                    tracing::debug!("Kill at hard timeout failed: {}", e);
                }
                let _ = child.wait();
                return Exit::HardTimeout(limit);
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    /// Connect briefly, note the flight state, pause, and read the basics.
    fn capture_diagnostics(&self, request: &ScriptRequest) -> (Value, Option<Value>, Option<bool>) {
        let mut session = match Session::open(
            self.connector.as_ref(),
            &request.target,
            self.config.diagnostics_timeout,
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Diagnostics connection failed: {}", e);
                let note = json!({ "note": format!("diagnostics unavailable: {}", e.kind()) });
                return (note, None, None);
            }
        };

        let conn = session.conn();
        let pre_pause_flight = flight_snapshot(conn).ok();
        let pause = self.control.pause(conn);

        let mut diagnostics = match collect_diagnostics(conn, TIMEOUT_DIAGNOSTIC_FIELDS) {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        diagnostics.insert(
            "pause".to_string(),
            serde_json::to_value(&pause).unwrap_or(Value::Null),
        );
        diagnostics.insert(
            "pre_pause_flight".to_string(),
            pre_pause_flight.clone().unwrap_or(Value::Null),
        );

        (
            Value::Object(diagnostics),
            pre_pause_flight,
            Some(pause.is_success()),
        )
    }
}

enum Exit {
    Exited(ExitStatus),
    HardTimeout(Duration),
    Lost(String),
}

/// Reads one pipe to EOF on its own thread, relaying lines as they arrive.
struct OutputReader {
    handle: thread::JoinHandle<()>,
    captured: Arc<Mutex<String>>,
}

impl OutputReader {
    fn spawn<R>(pipe: R, stream: LogStreamKind, observer: Arc<dyn RunObserver>) -> Self
    where
        R: Read + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&captured);
        let handle = thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        lock_unpoisoned(&sink).push_str(&text);
                        observer.on_output(stream, text.trim_end_matches(['\r', '\n']));
                    }
                    Err(e) => {
                        tracing::debug!("Error reading runner {}: {}", stream.as_str(), e);
                        break;
                    }
                }
            }
        });
        Self { handle, captured }
    }

    /// Wait up to `grace` for EOF, then return whatever was captured.
    fn finish(reader: Option<Self>, grace: Duration) -> String {
        let Some(reader) = reader else {
            return String::new();
        };
        let deadline = Instant::now() + grace;
        while !reader.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if reader.handle.is_finished() {
            let _ = reader.handle.join();
        } else {
            tracing::debug!("Output reader still open after {:?}; detaching", grace);
        }
        std::mem::take(&mut *lock_unpoisoned(&reader.captured))
    }
}

fn launch_failure(request: &ScriptRequest, err: &std::io::Error, code_stats: CodeStats) -> ScriptResult {
    tracing::warn!("Failed to launch script runner: {}", err);
    let error = ScriptErrorInfo::new(format!("{:?}", err.kind()), err.to_string());
    let mut result = ScriptResult::not_started(error, code_stats);
    result.attach_follow_up(&request.target);
    result
}

fn transcript(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{}\n{}", stdout, stderr)
    }
}

fn completed_result(
    status: ExitStatus,
    raw_stdout: String,
    stderr: String,
    elapsed: Duration,
    code_stats: CodeStats,
) -> ScriptResult {
    let (stdout, meta) = split_stdout_and_meta(&raw_stdout);
    let meta = meta.unwrap_or_default();

    let error = meta.error.or_else(|| {
        if status.success() {
            None
        } else if stderr.trim().is_empty() {
            Some(ScriptErrorInfo::new(
                "ExitStatus",
                format!("runner exited with {}", status),
            ))
        } else {
            Some(extract_error_from_stderr(&stderr))
        }
    });
    let ok = meta.ok.unwrap_or(status.success());

    ScriptResult {
        ok,
        summary: parse_summary(&stdout),
        transcript: transcript(&stdout, &stderr),
        stdout,
        stderr,
        error,
        paused: meta.paused,
        unpaused: meta.unpaused,
        timing: Timing {
            exec_time_s: meta.exec_time_s.or(Some(elapsed.as_secs_f64())),
        },
        pre_pause_flight: meta.pre_pause_flight,
        diagnostics: None,
        follow_up: None,
        code_stats,
    }
}

fn lost_result(
    reason: String,
    raw_stdout: String,
    stderr: String,
    elapsed: Duration,
    code_stats: CodeStats,
) -> ScriptResult {
    let (stdout, _) = split_stdout_and_meta(&raw_stdout);
    let mut result = ScriptResult::not_started(ScriptErrorInfo::new("RunnerError", reason), code_stats);
    result.summary = parse_summary(&stdout);
    result.transcript = transcript(&stdout, &stderr);
    result.stdout = stdout;
    result.stderr = stderr;
    result.timing.exec_time_s = Some(elapsed.as_secs_f64());
    result
}

fn hard_timeout_result(
    limit_secs: f64,
    raw_stdout: String,
    captured_stderr: String,
    diagnostics: Value,
    pre_pause_flight: Option<Value>,
    paused: Option<bool>,
    code_stats: CodeStats,
) -> ScriptResult {
    let (stdout, _) = split_stdout_and_meta(&raw_stdout);
    let mut stderr = captured_stderr;
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str("TimeoutExpired: hard timeout reached; process killed");

    ScriptResult {
        ok: false,
        summary: parse_summary(&stdout),
        transcript: transcript(&stdout, &stderr),
        stdout,
        stderr,
        error: Some(ScriptErrorInfo::hard_timeout()),
        paused,
        unpaused: None,
        timing: Timing {
            exec_time_s: Some(limit_secs),
        },
        pre_pause_flight,
        diagnostics: Some(diagnostics),
        follow_up: None,
        code_stats,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::sim::testing::{FakeConnector, FakeSim};
    use crate::sim::{DisconnectedConnector, SimTarget};

    /// Runner that executes the staged code with `sh`.
    fn sh_runner(connector: Arc<dyn SimConnector>) -> ScriptRunner {
        let config = ScriptConfig::default()
            .with_runner("sh", vec!["-c".to_string(), "exec sh ./user_code.sh".to_string()])
            .with_script_file_name("user_code.sh");
        ScriptRunner::new(config, connector)
    }

    fn request(code: &str) -> ScriptRequest {
        ScriptRequest::new(code, SimTarget::new("127.0.0.1"))
    }

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(LogStreamKind, String)>>,
        events: Mutex<Vec<String>>,
        inner: DetachedRun,
    }

    impl RunObserver for Recorder {
        fn on_output(&self, stream: LogStreamKind, line: &str) {
            self.lines.lock().unwrap().push((stream, line.to_string()));
        }

        fn on_event(&self, message: &str) {
            self.events.lock().unwrap().push(message.to_string());
        }

        fn register_cancel(&self, cancel: CancelFn) {
            self.inner.register_cancel(cancel);
        }

        fn is_cancel_requested(&self) -> bool {
            self.inner.is_cancel_requested()
        }
    }

    #[test]
    fn test_successful_run_with_meta_and_summary() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let code = r#"echo "working"
echo "SUMMARY: reached orbit"
echo "apoapsis 80km"
echo '__SIMBRIDGE_META__ {"ok": true, "paused": true, "unpaused": true, "exec_time_s": 1.25, "pre_pause_flight": {"altitude": 80000}}'
"#;
        let recorder = Arc::new(Recorder::default());
        let result = runner.run(&request(code), recorder.clone());

        assert!(result.ok, "unexpected failure: {:?}", result.error);
        assert_eq!(result.summary.as_deref(), Some("reached orbit\napoapsis 80km"));
        assert!(!result.stdout.contains("__SIMBRIDGE_META__"));
        assert_eq!(result.paused, Some(true));
        assert_eq!(result.unpaused, Some(true));
        assert_eq!(result.timing.exec_time_s, Some(1.25));
        assert_eq!(result.pre_pause_flight, Some(json!({"altitude": 80000})));
        assert!(result.follow_up.is_none());
        assert!(result.error.is_none());

        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines[0], (LogStreamKind::Stdout, "working".to_string()));
    }

    #[test]
    fn test_nonzero_exit_parses_stderr() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let code = r#"echo "partial"
echo 'Traceback (most recent call last):' >&2
echo '  File "user_code.py", line 4, in <module>' >&2
echo 'ZeroDivisionError: division by zero' >&2
exit 1
"#;
        let result = runner.run(&request(code), Arc::new(DetachedRun::new()));

        assert!(!result.ok);
        let error = result.error.as_ref().unwrap();
        assert_eq!(error.kind, "ZeroDivisionError");
        assert_eq!(error.message, "division by zero");
        assert_eq!(error.line, Some(4));
        assert!(result.transcript.starts_with("partial\n"));
        assert!(result.transcript.contains("ZeroDivisionError"));
        let follow_up = result.follow_up.unwrap();
        assert!(follow_up.suggest_get_diagnostics);
        assert_eq!(follow_up.params["address"], "127.0.0.1");
    }

    #[test]
    fn test_soft_timeout_reported_by_runner() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let code = r#"echo '__SIMBRIDGE_META__ {"ok": false, "error": {"type": "TimeoutError", "message": "Soft timeout exceeded"}}'"#;
        let req = request(code).with_timeouts(Some(1.0), Some(10.0));
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        assert!(!result.ok);
        assert_eq!(result.error_kind(), Some("TimeoutError"));
        assert_eq!(result.error.unwrap().message, "Soft timeout exceeded");
        assert!(result.diagnostics.is_none());
    }

    #[test]
    fn test_soft_timeout_without_hard_timeout_is_not_killed() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let code = r#"sleep 0.5
echo "still running"
echo '__SIMBRIDGE_META__ {"ok": false, "error": {"type": "TimeoutError", "message": "Soft timeout exceeded"}}'
"#;
        let req = request(code).with_timeouts(Some(0.1), None);
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        assert!(!result.ok);
        assert_eq!(result.error_kind(), Some("TimeoutError"));
        assert!(result.stdout.contains("still running"));
        assert!(!result.stderr.contains("TimeoutExpired"));
        assert!(result.diagnostics.is_none());
    }

    #[test]
    fn test_oversized_hard_timeout_runs_unsupervised() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let req = request("sleep 0.2\necho done\n").with_timeouts(None, Some(1e20));
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        assert!(result.ok, "unexpected failure: {:?}", result.error);
        assert!(result.stdout.contains("done"));
        assert!(result.diagnostics.is_none());
    }

    #[test]
    fn test_hard_timeout_kills_and_collects_diagnostics() {
        let sim = FakeSim::default()
            .with("readers.flight_snapshot", Ok(json!({"altitude": 1200.0})))
            .with("readers.vessel_info", Ok(json!({"name": "Probe"})))
            .with("readers.time_status", Ok(json!({"ut": 42.0})))
            .with("space_center.set_paused", Ok(Value::Null));
        let runner = sh_runner(Arc::new(FakeConnector::new(sim.clone())));

        let req = request("echo started\nexec sleep 30\n").with_timeouts(None, Some(0.3));
        let begin = Instant::now();
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        assert!(begin.elapsed() < Duration::from_secs(5));
        assert!(!result.ok);
        assert_eq!(result.error_kind(), Some("TimeoutError"));
        assert!(result.stderr.ends_with("TimeoutExpired: hard timeout reached; process killed"));
        assert_eq!(result.timing.exec_time_s, Some(0.3));
        assert!(result.stdout.contains("started"));
        assert_eq!(result.pre_pause_flight, Some(json!({"altitude": 1200.0})));
        assert_eq!(result.paused, Some(true));

        let diagnostics = result.diagnostics.as_ref().unwrap();
        assert_eq!(diagnostics["vessel"]["name"], "Probe");
        assert_eq!(diagnostics["time"]["ut"], 42.0);
        assert_eq!(diagnostics["pause"]["outcome"], "succeeded");
        assert_eq!(sim.calls_to("space_center.set_paused"), vec![vec![json!(true)]]);
        assert_eq!(*sim.closed.lock().unwrap(), 1);
        assert_eq!(result.follow_up.unwrap().tool, "get_diagnostics");
    }

    #[test]
    fn test_hard_timeout_without_simulation() {
        let runner = sh_runner(Arc::new(FakeConnector::refusing()));
        let req = request("exec sleep 30\n").with_timeouts(None, Some(0.2));
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        assert_eq!(result.error_kind(), Some("TimeoutError"));
        assert_eq!(
            result.diagnostics,
            Some(json!({"note": "diagnostics unavailable: ConnectionError"}))
        );
        assert!(result.pre_pause_flight.is_none());
    }

    #[test]
    fn test_launch_failure() {
        let config = ScriptConfig::default()
            .with_runner("/nonexistent/simbridge-runner", vec![]);
        let runner = ScriptRunner::new(config, Arc::new(DisconnectedConnector));
        let result = runner.run(
            &request("import math\nprint(math.pi)"),
            Arc::new(DetachedRun::new()),
        );

        assert!(!result.ok);
        assert_eq!(result.error_kind(), Some("NotFound"));
        assert_eq!(result.code_stats.line_count, 2);
        assert!(result.code_stats.has_imports);
        assert!(result.follow_up.is_some());
    }

    #[test]
    fn test_cancellation_kills_runner() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let recorder = Arc::new(Recorder::default());

        let canceller = {
            let recorder = recorder.clone();
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while recorder.lines.lock().unwrap().is_empty() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                recorder.inner.cancel();
            })
        };

        let begin = Instant::now();
        let result = runner.run(&request("echo ready\nexec sleep 30\n"), recorder.clone());
        canceller.join().unwrap();

        assert!(begin.elapsed() < Duration::from_secs(10));
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.kind, "Cancelled");
        assert_eq!(error.message, "Job cancelled by user");
        assert!(
            recorder
                .events
                .lock()
                .unwrap()
                .contains(&"[execute_script] cancellation requested".to_string())
        );
    }

    #[test]
    fn test_cancelled_before_start_does_not_spawn() {
        let runner = sh_runner(Arc::new(DisconnectedConnector));
        let observer = Arc::new(DetachedRun::new());
        observer.cancel();
        let result = runner.run(&request("echo never"), observer);
        assert_eq!(result.error_kind(), Some("Cancelled"));
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_payload_is_single_json_argument() {
        let config = ScriptConfig::default()
            .with_runner(
                "sh",
                vec!["-c".to_string(), "printf '%s\\n' \"$0\"".to_string()],
            )
            .with_script_file_name("user_code.sh");
        let runner = ScriptRunner::new(config, Arc::new(DisconnectedConnector));
        let req = ScriptRequest {
            allow_imports: true,
            ..request("x").with_timeouts(Some(0.0), None)
        };
        let result = runner.run(&req, Arc::new(DetachedRun::new()));

        let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
        assert_eq!(payload["address"], "127.0.0.1");
        assert_eq!(payload["rpc_port"], 50000);
        assert_eq!(payload["timeout_sec"], Value::Null);
        assert_eq!(payload["allow_imports"], true);
        assert!(payload["code_path"].as_str().unwrap().ends_with("user_code.sh"));
    }
}
