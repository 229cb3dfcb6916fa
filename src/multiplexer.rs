//! Concurrent output multiplexer for a running session.
//!
//! Two reader threads drain the child's stdout and stderr into a shared
//! channel; the multiplexer loop races `recv_timeout` against a short poll
//! interval. Stdout goes through the line framer, stderr is surfaced one
//! chunk per record, and every quiet cycle is reported to the sink, which
//! owns the one-shot "waiting for input" flag — output or delivered input
//! clears it, so each stall is noticed once.
//!
//! The idle check is a heuristic: a blocked `scanf` and a slow CPU-bound
//! loop look identical from this side of the pipe. False positives are
//! accepted; the flag resets as soon as output resumes.

use std::io::Read;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::framer::{Line, LineFramer};
use crate::supervisor::RunningChild;

/// Read size per cycle; anything larger just arrives as multiple events.
const CHUNK_SIZE: usize = 1024;

/// Cap on post-exit draining, in case a pipe is inherited by a grandchild
/// and never reaches EOF.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// A chunk read from one of the child's output streams.
#[derive(Debug)]
pub enum StreamEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Where multiplexed output goes: the session appends to its transcript and
/// forwards to the chat channel behind this seam.
pub trait MuxSink {
    /// A complete stdout line (also used for the final unterminated flush).
    fn line(&mut self, line: &Line);
    /// One stderr record, delivered verbatim.
    fn stderr_chunk(&mut self, text: &str);
    /// A poll cycle passed with no output. The sink keeps the one-shot
    /// "waiting for input" state, so delivered input re-arms the notice for
    /// the next stall.
    fn idle(&mut self);
}

/// Spawn the two reader threads and hand back the merged event stream.
///
/// Readers run until EOF or a read error; either way they drop their sender,
/// so channel disconnection means both pipes are done.
pub fn spawn_readers(
    stdout: impl Read + Send + 'static,
    stderr: impl Read + Send + 'static,
) -> Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel();
    spawn_reader("stdout", stdout, tx.clone(), StreamEvent::Stdout);
    spawn_reader("stderr", stderr, tx, StreamEvent::Stderr);
    rx
}

fn spawn_reader(
    name: &'static str,
    mut stream: impl Read + Send + 'static,
    tx: Sender<StreamEvent>,
    wrap: fn(Vec<u8>) -> StreamEvent,
) {
    thread::spawn(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Treated as end of stream; must not wedge the session.
                    debug!("{name} read error (child likely exited): {e}");
                    break;
                }
            }
        }
    });
}

/// Drive one running session's output until the child exits or the session
/// is cancelled.
///
/// Returns the exit status when the child was observed to exit, or `None`
/// when the loop stopped on cancellation. On exit the pending tail is
/// flushed through the sink as a final line.
pub fn run(
    child: &Arc<Mutex<RunningChild>>,
    rx: Receiver<StreamEvent>,
    sink: &mut dyn MuxSink,
    cancel: &AtomicBool,
    poll_timeout: Duration,
) -> Option<ExitStatus> {
    let mut framer = LineFramer::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!("multiplexer cancelled");
            return None;
        }

        match rx.recv_timeout(poll_timeout) {
            Ok(event) => deliver(event, &mut framer, sink),
            Err(RecvTimeoutError::Timeout) => {
                // Quiet cycle. The program may be blocked on a read — with a
                // printed prompt pending, or with no output at all.
                sink.idle();
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Both pipes closed; nothing left but waiting for the exit
                // status below.
                thread::sleep(poll_timeout);
            }
        }

        let status = child.lock().unwrap().try_exit();
        if let Some(status) = status {
            drain(&rx, &mut framer, sink);
            if let Some(last) = framer.take_remainder() {
                sink.line(&last);
            }
            debug!(code = ?status.code(), "child exited, multiplexer stopping");
            return Some(status);
        }
    }
}

fn deliver(event: StreamEvent, framer: &mut LineFramer, sink: &mut dyn MuxSink) {
    match event {
        StreamEvent::Stdout(bytes) => {
            let chunk = String::from_utf8_lossy(&bytes);
            for line in framer.push(&chunk) {
                sink.line(&line);
            }
        }
        StreamEvent::Stderr(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            sink.stderr_chunk(text.trim_end_matches('\n'));
        }
    }
}

/// Consume whatever the readers still had in flight when the exit status
/// was observed.
fn drain(rx: &Receiver<StreamEvent>, framer: &mut LineFramer, sink: &mut dyn MuxSink) {
    let deadline = Instant::now() + DRAIN_DEADLINE;
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => deliver(event, framer, sink),
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
