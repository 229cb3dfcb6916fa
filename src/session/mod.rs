//! Session lifecycle — one user's submit → compile → run → terminate arc.
//!
//! ```text
//! AwaitingCode → Compiling → Running → Terminated
//!        \___________\__________\_____↗  (cancel / error / idle timeout)
//! ```
//!
//! `Terminated` is terminal and reachable from every state. Cleanup runs
//! exactly once per session, on every path in, and each step is
//! best-effort: a stuck process must not stop artifact removal and vice
//! versa.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::supervisor::{RunningChild, SupervisorError};
use crate::transcript::{EntryKind, Transcript};

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the user to submit source text.
    AwaitingCode,
    /// Source stored, compiler running.
    Compiling,
    /// Compiled program is live; output is being multiplexed.
    Running,
    /// Done. Resources released, transcript frozen.
    Terminated,
}

/// Per-session temporary files: the source, the compiled binary, and any
/// report files generated at the end. All live in one directory so cleanup
/// is a single remove.
#[derive(Debug)]
pub struct Artifacts {
    dir: PathBuf,
    pub source_path: PathBuf,
    pub binary_path: PathBuf,
}

impl Artifacts {
    pub fn create() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("crunner-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session dir {}", dir.display()))?;
        Ok(Self {
            source_path: dir.join("submission.c"),
            binary_path: dir.join("submission"),
            dir,
        })
    }

    /// Path for a generated report file inside the session directory.
    pub fn report_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Best-effort removal of everything the session created.
    pub fn remove_all(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), "failed to remove session artifacts: {e}");
            }
        }
    }
}

/// One user's interactive session.
pub struct Session {
    pub chat_id: String,
    state: SessionState,
    pub source: Option<String>,
    child: Option<Arc<Mutex<RunningChild>>>,
    pub transcript: Transcript,
    pub artifacts: Option<Artifacts>,
    /// Set by idle detection; cleared when input is sent or output resumes.
    pub awaiting_input: bool,
    /// Tells the multiplexer loop to stop on its next cycle.
    pub cancel: Arc<AtomicBool>,
    last_activity: Instant,
    cleaned: bool,
}

impl Session {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            state: SessionState::AwaitingCode,
            source: None,
            child: None,
            transcript: Transcript::new(),
            artifacts: None,
            awaiting_input: false,
            cancel: Arc::new(AtomicBool::new(false)),
            last_activity: Instant::now(),
            cleaned: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// `submit(source)`: store normalized source, create the artifact
    /// directory and write the source file, move to `Compiling`.
    pub fn begin_compile(&mut self, source: String) -> Result<()> {
        debug_assert_eq!(self.state, SessionState::AwaitingCode);

        let artifacts = Artifacts::create()?;
        std::fs::write(&artifacts.source_path, &source).with_context(|| {
            format!("failed to write source to {}", artifacts.source_path.display())
        })?;

        self.source = Some(source);
        self.artifacts = Some(artifacts);
        self.state = SessionState::Compiling;
        self.transcript.push(EntryKind::System, "compiling submission");
        self.touch();
        Ok(())
    }

    /// Compile succeeded and the binary was launched.
    pub fn mark_running(&mut self, child: Arc<Mutex<RunningChild>>) {
        debug_assert_eq!(self.state, SessionState::Compiling);
        self.child = Some(child);
        self.state = SessionState::Running;
        self.touch();
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Shared handle to the supervised child, if one is live.
    pub fn child(&self) -> Option<Arc<Mutex<RunningChild>>> {
        self.child.clone()
    }

    /// Forward one line of user input to the child's stdin.
    pub fn write_input(&mut self, text: &str) -> Result<(), SupervisorError> {
        let Some(child) = self.child.as_ref() else {
            return Err(SupervisorError::PipeClosed);
        };
        child.lock().unwrap().write_input(text)?;
        self.transcript.push(EntryKind::Input, text);
        self.awaiting_input = false;
        self.touch();
        Ok(())
    }

    /// Transition into `Terminated` and release everything.
    ///
    /// Idempotent: the second and later calls are no-ops. Every step is
    /// best-effort so one failure never blocks the rest.
    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        debug!(chat_id = %self.chat_id, "cleaning up session");
        self.cancel.store(true, Ordering::Relaxed);

        if let Some(child) = self.child.take() {
            child.lock().unwrap().terminate();
        }

        if let Some(artifacts) = self.artifacts.take() {
            artifacts.remove_all();
        }

        self.source = None;
        self.awaiting_input = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}
