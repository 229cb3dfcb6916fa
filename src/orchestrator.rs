//! Session routing and the submit → compile → run → report pipeline.
//!
//! One `Bot` owns the map from conversation id to session. The transport
//! loop feeds it inbound messages; everything per-session happens on a
//! dedicated worker thread so a long-running program never blocks polling.
//! The worker wraps the whole launch → run → react sequence so cleanup
//! fires on every exit path — normal completion, compile failure, pipe
//! errors, cancellation — exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::channel::ChatChannel;
use crate::config::BotConfig;
use crate::framer::{Line, LineClass};
use crate::multiplexer::{self, MuxSink};
use crate::normalize::normalize_whitespace;
use crate::report::{self, RenderError};
use crate::session::{Session, SessionState};
use crate::supervisor::{self, CompileOutcome, SupervisorError};
use crate::transcript::EntryKind;

const USAGE: &str = "Send me a C program as a message and I will compile and run it.\n\
While it runs, plain messages are forwarded to its standard input.\n\
/cancel stops the current run. You get a transcript report at the end.";

const WHITESPACE_NOTICE: &str = "note: the code contained non-standard whitespace \
(non-breaking spaces or tabs); it was normalized before compiling.";

const AWAITING_INPUT_NOTICE: &str = "the program seems to be waiting for input — \
send a message and I will forward it.";

const PIPE_CLOSED_NOTICE: &str = "the program ended before your input could be delivered.";

pub struct Bot {
    config: Arc<BotConfig>,
    channel: Arc<dyn ChatChannel>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    renderer_ok: bool,
}

impl Bot {
    pub fn new(config: Arc<BotConfig>, channel: Arc<dyn ChatChannel>, renderer_ok: bool) -> Self {
        Self {
            config,
            channel,
            sessions: Mutex::new(HashMap::new()),
            renderer_ok,
        }
    }

    /// Route one inbound message. Commands are handled inline; a source
    /// submission hands off to a worker thread.
    pub fn handle_message(self: &Arc<Self>, chat_id: &str, text: &str) {
        match text.trim() {
            "/start" | "/help" => {
                self.send(chat_id, USAGE);
                return;
            }
            "/cancel" => {
                self.cancel_session(chat_id);
                return;
            }
            _ => {}
        }

        let session = self.session_for(chat_id);
        let state = session.lock().unwrap().state();
        match state {
            SessionState::Running => self.forward_input(chat_id, &session, text),
            SessionState::Compiling => {
                session.lock().unwrap().touch();
                self.send(chat_id, "still compiling the previous submission, hang on.");
            }
            SessionState::AwaitingCode => self.spawn_submission(chat_id, session, text.to_string()),
            SessionState::Terminated => {
                // Stale map entry; replace and retry as a fresh submission.
                self.remove_session(chat_id, &session);
                let fresh = self.session_for(chat_id);
                self.spawn_submission(chat_id, fresh, text.to_string());
            }
        }
    }

    /// Terminate sessions whose users went quiet.
    pub fn sweep_idle(&self) {
        let limit = self.config.runner.session_idle_timeout();
        let expired: Vec<(String, Arc<Mutex<Session>>)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .iter()
                .filter(|(_, s)| s.lock().unwrap().idle_for() >= limit)
                .map(|(id, s)| (id.clone(), Arc::clone(s)))
                .collect()
        };

        for (chat_id, session) in expired {
            info!(chat_id = %chat_id, "terminating idle session");
            session.lock().unwrap().terminate();
            self.remove_session(&chat_id, &session);
            self.send(&chat_id, "session closed after inactivity.");
        }
    }

    /// Terminate everything; used on shutdown.
    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self.sessions.lock().unwrap().drain().collect();
        for (chat_id, session) in drained {
            debug!(chat_id = %chat_id, "terminating session on shutdown");
            session.lock().unwrap().terminate();
        }
    }

    #[cfg(test)]
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn session_for(&self, chat_id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        Arc::clone(
            sessions
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(chat_id)))),
        )
    }

    /// Evict `session` from the map — but only if the map still holds that
    /// exact session. A worker finishing up after the user already started a
    /// replacement must not tear the replacement down.
    fn remove_session(&self, chat_id: &str, session: &Arc<Mutex<Session>>) {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions
            .get(chat_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(chat_id);
        }
    }

    fn cancel_session(&self, chat_id: &str) {
        let existing = self.sessions.lock().unwrap().get(chat_id).cloned();
        match existing {
            Some(session) => {
                session.lock().unwrap().terminate();
                self.remove_session(chat_id, &session);
                self.send(chat_id, "session cancelled.");
            }
            None => self.send(chat_id, "nothing to cancel."),
        }
    }

    fn forward_input(&self, chat_id: &str, session: &Arc<Mutex<Session>>, text: &str) {
        let result = session.lock().unwrap().write_input(text);
        match result {
            Ok(()) => debug!(chat_id = %chat_id, "input forwarded"),
            Err(SupervisorError::PipeClosed) => {
                self.send(chat_id, PIPE_CLOSED_NOTICE);
                session.lock().unwrap().terminate();
                self.remove_session(chat_id, session);
            }
            Err(SupervisorError::Io(e)) => {
                warn!(chat_id = %chat_id, "stdin write failed: {e}");
                self.send(chat_id, PIPE_CLOSED_NOTICE);
                session.lock().unwrap().terminate();
                self.remove_session(chat_id, session);
            }
        }
    }

    fn spawn_submission(self: &Arc<Self>, chat_id: &str, session: Arc<Mutex<Session>>, text: String) {
        let bot = Arc::clone(self);
        let chat_id = chat_id.to_string();
        thread::spawn(move || {
            bot.run_submission(&chat_id, session, text);
        });
    }

    /// The whole compile → launch → multiplex → report → cleanup sequence
    /// for one submission. Every exit path ends in `terminate()`.
    fn run_submission(self: &Arc<Self>, chat_id: &str, session: Arc<Mutex<Session>>, text: String) {
        let normalized = normalize_whitespace(&text);
        if normalized.changed {
            self.send(chat_id, WHITESPACE_NOTICE);
        }

        // submit(source): AwaitingCode → Compiling
        let (source_path, binary_path) = {
            let mut s = session.lock().unwrap();
            if let Err(e) = s.begin_compile(normalized.text) {
                error!(chat_id = %chat_id, "failed to stage submission: {e:#}");
                self.send(chat_id, "internal error while preparing your submission.");
                s.terminate();
                drop(s);
                self.remove_session(chat_id, &session);
                return;
            }
            let artifacts = s.artifacts.as_ref().expect("artifacts exist after begin_compile");
            (artifacts.source_path.clone(), artifacts.binary_path.clone())
        };

        let outcome = supervisor::compile(
            &self.config.compiler.program,
            &self.config.compiler.args,
            &source_path,
            &binary_path,
        );

        match outcome {
            Ok(CompileOutcome::Success) => {}
            Ok(CompileOutcome::Failed { diagnostic }) => {
                // Compiling → Terminated; diagnostic goes out verbatim,
                // escaped by the transport.
                session
                    .lock()
                    .unwrap()
                    .transcript
                    .push(EntryKind::Error, diagnostic.clone());
                if let Err(e) = self.channel.send_code_block(chat_id, &diagnostic) {
                    warn!(chat_id = %chat_id, "failed to send diagnostic: {e:#}");
                }
                if supervisor::looks_like_whitespace_issue(&diagnostic) {
                    self.send(
                        chat_id,
                        "the compiler tripped on invisible non-ASCII characters — \
                         try re-pasting the code from a plain-text editor.",
                    );
                } else {
                    self.send(chat_id, "compilation failed.");
                }
                session.lock().unwrap().terminate();
                self.remove_session(chat_id, &session);
                return;
            }
            Err(e) => {
                error!(chat_id = %chat_id, "compiler invocation failed: {e:#}");
                self.send(chat_id, "could not invoke the compiler.");
                session.lock().unwrap().terminate();
                self.remove_session(chat_id, &session);
                return;
            }
        }

        // compileSucceeds: Compiling → Running
        let (child, rx, cancel, poll_timeout) = {
            let mut launched = match supervisor::launch(&binary_path) {
                Ok(c) => c,
                Err(e) => {
                    error!(chat_id = %chat_id, "launch failed: {e:#}");
                    self.send(chat_id, "the compiled program could not be started.");
                    session.lock().unwrap().terminate();
                    self.remove_session(chat_id, &session);
                    return;
                }
            };
            let rx = multiplexer::spawn_readers(launched.take_stdout(), launched.take_stderr());
            let child = Arc::new(Mutex::new(launched));

            let mut s = session.lock().unwrap();
            s.mark_running(Arc::clone(&child));
            s.transcript.push(EntryKind::System, "program started");
            (child, rx, Arc::clone(&s.cancel), self.config.runner.poll_timeout())
        };
        self.send(chat_id, "compiled successfully — program is running.");

        let mut sink = SessionSink {
            chat_id,
            session: &session,
            channel: self.channel.as_ref(),
        };
        let status = multiplexer::run(&child, rx, &mut sink, &cancel, poll_timeout);

        match status {
            Some(status) => {
                let summary = match status.code() {
                    Some(code) => format!("program finished (exit code {code})"),
                    None => "program terminated by signal".to_string(),
                };
                session.lock().unwrap().transcript.push(EntryKind::System, &summary);
                self.send(chat_id, &summary);
                self.deliver_report(chat_id, &session);
            }
            None => {
                // Cancelled mid-run; whoever flipped the flag already
                // notified the user.
                debug!(chat_id = %chat_id, "run cancelled");
            }
        }

        session.lock().unwrap().terminate();
        self.remove_session(chat_id, &session);
    }

    /// Render and ship the transcript report. PDF when the renderer is
    /// available, markdown otherwise; render failures degrade, they never
    /// fail the session.
    fn deliver_report(&self, chat_id: &str, session: &Arc<Mutex<Session>>) {
        let (markdown, pdf_path) = {
            let s = session.lock().unwrap();
            let source = s.source.as_deref().unwrap_or_default();
            let markdown = report::render_markdown(source, &s.transcript);
            let pdf_path = s.artifacts.as_ref().map(|a| a.report_path("report.pdf"));
            (markdown, pdf_path)
        };

        if self.renderer_ok {
            if let Some(pdf_path) = pdf_path {
                match report::render_pdf(&self.config.report.renderer, &markdown, &pdf_path) {
                    Ok(()) => match std::fs::read(&pdf_path) {
                        Ok(bytes) => {
                            if let Err(e) = self.channel.send_document(chat_id, &bytes, "report.pdf")
                            {
                                warn!(chat_id = %chat_id, "failed to send report: {e:#}");
                            }
                            return;
                        }
                        Err(e) => warn!("rendered report unreadable: {e}"),
                    },
                    Err(RenderError::Unavailable) => {
                        warn!("document renderer disappeared; falling back to markdown");
                    }
                    Err(RenderError::Failed(detail)) => {
                        warn!("document render failed: {detail}");
                    }
                }
            }
        }

        if let Err(e) = self
            .channel
            .send_document(chat_id, markdown.as_bytes(), "report.md")
        {
            warn!(chat_id = %chat_id, "failed to send markdown report: {e:#}");
        }
    }

    fn send(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.channel.send_text(chat_id, text) {
            warn!(chat_id = %chat_id, "send_text failed: {e:#}");
        }
    }
}

/// Multiplexer sink bound to one session: appends to the transcript and
/// forwards to the user in the same observation order. The session's
/// `awaiting_input` flag lives here and in `Session::write_input`, so output
/// and delivered input both re-arm the idle notice for the next stall.
struct SessionSink<'a> {
    chat_id: &'a str,
    session: &'a Arc<Mutex<Session>>,
    channel: &'a dyn ChatChannel,
}

impl MuxSink for SessionSink<'_> {
    fn line(&mut self, line: &Line) {
        {
            let mut s = self.session.lock().unwrap();
            let kind = match line.class {
                LineClass::Prompt => EntryKind::Prompt,
                LineClass::Output => EntryKind::Output,
            };
            s.transcript.push(kind, &line.text);
            s.awaiting_input = false;
            s.touch();
        }
        let shown = match line.class {
            LineClass::Prompt => format!("❯ {}", line.text),
            LineClass::Output => line.text.clone(),
        };
        if let Err(e) = self.channel.send_text(self.chat_id, &shown) {
            warn!("failed to forward output line: {e:#}");
        }
    }

    fn stderr_chunk(&mut self, text: &str) {
        self.session
            .lock()
            .unwrap()
            .transcript
            .push(EntryKind::Error, text);
        if let Err(e) = self.channel.send_code_block(self.chat_id, text) {
            warn!("failed to forward stderr: {e:#}");
        }
    }

    fn idle(&mut self) {
        // One notice per stall: only the transition into the awaiting state
        // notifies. Output lines and forwarded input clear the flag.
        let notify = {
            let mut s = self.session.lock().unwrap();
            !std::mem::replace(&mut s.awaiting_input, true)
        };
        if notify {
            if let Err(e) = self.channel.send_text(self.chat_id, AWAITING_INPUT_NOTICE) {
                warn!("failed to send awaiting-input notice: {e:#}");
            }
        }
    }
}
