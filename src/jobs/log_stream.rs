//! Line-buffered writer that turns a byte stream into job log lines.

use std::borrow::Cow;
use std::io;
use std::sync::{Arc, Mutex};

use crate::util::{lock_unpoisoned, utc_timestamp};

/// Which channel a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStreamKind {
    Stdout,
    Stderr,
    Log,
}

impl LogStreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStreamKind::Stdout => "stdout",
            LogStreamKind::Stderr => "stderr",
            LogStreamKind::Log => "log",
        }
    }
}

/// Render a log entry as `[<ISO-8601 UTC>] [<stream>] <message>`.
pub fn format_log_line(stream: LogStreamKind, message: &str) -> String {
    format!(
        "[{}] [{}] {}",
        utc_timestamp(),
        stream.as_str(),
        sanitize_line(message)
    )
}

/// Escape control characters so one entry never spans several terminal lines.
pub fn sanitize_line(message: &str) -> Cow<'_, str> {
    let message = message.strip_suffix('\r').unwrap_or(message);
    if !message.chars().any(needs_escape) {
        return Cow::Borrowed(message);
    }
    let mut out = String::with_capacity(message.len() + 8);
    for c in message.chars() {
        if needs_escape(c) {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn needs_escape(c: char) -> bool {
    c.is_control() && c != '\t'
}

/// Receives complete lines from a [`LogStream`].
pub trait LineSink: Send + Sync {
    fn append_line(&self, stream: LogStreamKind, line: &str);
}

/// Buffers writes and forwards each complete line to a [`LineSink`].
///
/// Bytes are accumulated until a `\n`; each complete line is decoded lossily,
/// stripped of a trailing `\r` and handed to the sink. `flush_pending` emits
/// whatever is left as a final line.
pub struct LogStream {
    sink: Arc<dyn LineSink>,
    stream: LogStreamKind,
    buffer: Mutex<Vec<u8>>,
}

impl LogStream {
    pub fn new(sink: Arc<dyn LineSink>, stream: LogStreamKind) -> Self {
        Self {
            sink,
            stream,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> LogStreamKind {
        self.stream
    }

    /// Write text into the stream.
    pub fn write_str(&self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Write raw bytes into the stream.
    pub fn write_bytes(&self, data: &[u8]) {
        let mut buffer = lock_unpoisoned(&self.buffer);
        buffer.extend_from_slice(data);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
    }

    /// Emit any buffered partial line.
    pub fn flush_pending(&self) {
        let mut buffer = lock_unpoisoned(&self.buffer);
        if !buffer.is_empty() {
            let rest = std::mem::take(&mut *buffer);
            self.emit(&rest);
        }
    }

    fn emit(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        self.sink.append_line(self.stream, &text);
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("stream", &self.stream)
            .finish()
    }
}

impl io::Write for &LogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending();
        Ok(())
    }
}

impl io::Write for LogStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}
