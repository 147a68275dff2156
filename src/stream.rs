//! Stream interception: turn raw child-process or own-process output into
//! submitted log lines.
//!
//! Two entry points, both funneling into the same [`RawLine`] channel so a
//! single consumer (owned by the top-level manager) applies the marker
//! skip-list, parses, and hands entries to delivery:
//!
//! - [`forward_streams`] reads line-by-line from a child process's stdout/
//!   stderr handles.
//! - [`forward`] wraps the caller's own stdout/stderr writers so that every
//!   write both reaches its original destination unchanged *and* is parsed
//!   and submitted. `InterceptingWriter::into_inner` hands the original
//!   writer back, in place of a monkey-patch restore.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::log_entry::{parse_line, LogEntry, Severity};

/// Lines containing either marker never reach delivery. Keeps the delivery
/// layer's own diagnostic prints from looping back through interception.
const SKIP_MARKERS: [&str; 2] = ["[OpenPull", "DEBUG:"];

fn should_skip(line: &str) -> bool {
    SKIP_MARKERS.iter().any(|marker| line.contains(marker))
}

/// A line observed on an intercepted stream, tagged with the severity to
/// fall back to if the line doesn't parse as structured JSON.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub default_severity: Severity,
}

pub type LineSender = mpsc::UnboundedSender<RawLine>;
pub type LineReceiver = mpsc::UnboundedReceiver<RawLine>;

pub fn line_channel() -> (LineSender, LineReceiver) {
    mpsc::unbounded_channel()
}

/// Applies the marker skip-list and the empty-message guard. `None` means
/// the line must not reach delivery.
pub fn filter_and_parse(raw: RawLine) -> Option<LogEntry> {
    if should_skip(&raw.text) {
        return None;
    }
    let entry = parse_line(&raw.text, raw.default_severity);
    if entry.message.is_empty() {
        return None;
    }
    Some(entry)
}

/// Process-wide (here: per-writer) flag held for the duration of a
/// submission so that a write occurring inside it passes through to the
/// underlying writer but is not itself re-submitted.
#[derive(Clone, Default)]
struct RecursionGuard(Arc<AtomicBool>);

impl RecursionGuard {
    fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> GuardScope<'_> {
        self.0.store(true, Ordering::SeqCst);
        GuardScope(&self.0)
    }
}

struct GuardScope<'a>(&'a AtomicBool);

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Attaches line readers to a child process's stdout/stderr. Stdout lines
/// default to `info`, stderr lines to `error`. Returns the two reader
/// tasks; dropping `sender`'s receiver stops both once the process exits.
pub fn forward_streams<R1, R2>(stdout: R1, stderr: R2, sender: LineSender) -> (JoinHandle<()>, JoinHandle<()>)
where
    R1: AsyncRead + Unpin + Send + 'static,
    R2: AsyncRead + Unpin + Send + 'static,
{
    let out_task = spawn_line_reader(stdout, Severity::Info, sender.clone());
    let err_task = spawn_line_reader(stderr, Severity::Error, sender);
    (out_task, err_task)
}

fn spawn_line_reader<R>(reader: R, default_severity: Severity, sender: LineSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if sender.send(RawLine { text, default_severity }).is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    })
}

/// Wraps a synchronous writer (typically the process's own stdout/stderr)
/// so every write is mirrored unchanged and also split into lines and
/// submitted to `sender`.
pub struct InterceptingWriter<W: Write> {
    inner: W,
    sender: LineSender,
    default_severity: Severity,
    guard: RecursionGuard,
    pending: Vec<u8>,
}

impl<W: Write> InterceptingWriter<W> {
    pub fn new(inner: W, default_severity: Severity, sender: LineSender) -> Self {
        Self {
            inner,
            sender,
            default_severity,
            guard: RecursionGuard::default(),
            pending: Vec::new(),
        }
    }

    /// Stops interception and hands the original writer back.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for InterceptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if !self.guard.is_active() {
            self.pending.extend_from_slice(&buf[..written]);
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
                if let Ok(text) = String::from_utf8(line_bytes) {
                    let _scope = self.guard.enter();
                    let _ = self.sender.send(RawLine {
                        text,
                        default_severity: self.default_severity,
                    });
                }
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps the caller's own stdout/stderr writers for interception. Returns
/// the wrapped writers in place of the originals; call `into_inner` on each
/// to restore.
pub fn forward<WOut: Write, WErr: Write>(
    stdout: WOut,
    stderr: WErr,
    sender: LineSender,
) -> (InterceptingWriter<WOut>, InterceptingWriter<WErr>) {
    (
        InterceptingWriter::new(stdout, Severity::Info, sender.clone()),
        InterceptingWriter::new(stderr, Severity::Error, sender),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_lines_are_skipped() {
        assert!(should_skip("[OpenPull] handshake complete"));
        assert!(should_skip("DEBUG: retry in 5s"));
        assert!(!should_skip("ordinary line"));
    }

    #[test]
    fn filter_and_parse_drops_marker_and_empty_lines() {
        assert!(filter_and_parse(RawLine {
            text: "[OpenPull] internal".into(),
            default_severity: Severity::Info,
        })
        .is_none());

        assert!(filter_and_parse(RawLine {
            text: "   ".into(),
            default_severity: Severity::Info,
        })
        .is_none());

        let entry = filter_and_parse(RawLine {
            text: "server listening".into(),
            default_severity: Severity::Info,
        })
        .unwrap();
        assert_eq!(entry.message, "server listening");
    }

    #[test]
    fn intercepting_writer_passes_through_and_emits_lines() {
        let (tx, mut rx) = line_channel();
        let mut writer = InterceptingWriter::new(Vec::new(), Severity::Error, tx);

        writer.write_all(b"first line\nsecond").unwrap();
        writer.write_all(b" line\n").unwrap();

        let restored = writer.into_inner();
        assert_eq!(restored, b"first line\nsecond line\n");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.text, "first line");
        let second = rx.try_recv().unwrap();
        assert_eq!(second.text, "second line");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forward_streams_splits_stdout_and_stderr_with_defaults() {
        let stdout = tokio::io::BufReader::new("out one\nout two\n".as_bytes());
        let stderr = tokio::io::BufReader::new("err one\n".as_bytes());
        let (tx, mut rx) = line_channel();

        let (out_task, err_task) = forward_streams(stdout, stderr, tx);
        out_task.await.unwrap();
        err_task.await.unwrap();

        let mut received = Vec::new();
        while let Ok(line) = rx.try_recv() {
            received.push(line);
        }
        assert_eq!(received.len(), 3);
        assert!(received
            .iter()
            .any(|l| l.text == "out one" && matches!(l.default_severity, Severity::Info)));
        assert!(received
            .iter()
            .any(|l| l.text == "err one" && matches!(l.default_severity, Severity::Error)));
    }
}
