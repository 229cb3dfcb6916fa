//! Child process supervision — compile, launch, stdin forwarding, teardown.
//!
//! Owns the lifecycle of the one process a session may run: invoke the
//! system C compiler against the submitted source, launch the produced
//! binary with all three standard streams piped, write user input to its
//! stdin, and terminate it with SIGTERM→SIGKILL escalation when the session
//! ends.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

/// How long to wait after a graceful termination request before escalating.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The child has exited or closed its stdin; input cannot be delivered.
    #[error("child process stdin is closed")]
    PipeClosed,

    #[error("i/o error talking to child process: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a compile invocation.
#[derive(Debug)]
pub enum CompileOutcome {
    Success,
    /// Compiler exited non-zero; `diagnostic` is its captured stderr.
    Failed { diagnostic: String },
}

/// Compile `source` into `binary` with the configured compiler.
///
/// Stderr is captured in full; success is exit code zero and nothing else.
pub fn compile(
    program: &str,
    extra_args: &[String],
    source: &Path,
    binary: &Path,
) -> Result<CompileOutcome> {
    let output = Command::new(program)
        .args(extra_args)
        .arg(source)
        .arg("-o")
        .arg(binary)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to invoke compiler '{program}'"))?;

    let diagnostic = String::from_utf8_lossy(&output.stderr).into_owned();
    debug!(
        success = output.status.success(),
        stderr_len = diagnostic.len(),
        "compiler finished"
    );

    if output.status.success() {
        Ok(CompileOutcome::Success)
    } else {
        Ok(CompileOutcome::Failed { diagnostic })
    }
}

/// Heuristic: does this compiler diagnostic look like it was caused by
/// non-ASCII whitespace in the source? gcc and clang report such bytes as
/// "stray" octal escapes (NBSP is `\302\240` in UTF-8).
pub fn looks_like_whitespace_issue(diagnostic: &str) -> bool {
    diagnostic.contains("stray")
        && (diagnostic.contains("\\302") || diagnostic.contains("\\240") || diagnostic.contains("non-ASCII"))
}

/// A launched, supervised child process.
///
/// Stdout/stderr handles are taken once by the multiplexer; stdin stays here
/// so the session is the only writer.
pub struct RunningChild {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Launch the compiled binary with stdin/stdout/stderr piped.
///
/// Runs through `stdbuf -o0 -e0` when available so libc stdio delivers
/// bytes as the program produces them instead of batching 4k blocks on a
/// pipe. Falls back to a direct spawn when coreutils is absent.
pub fn launch(binary: &Path) -> Result<RunningChild> {
    let spawned = Command::new("stdbuf")
        .arg("-o0")
        .arg("-e0")
        .arg(binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("stdbuf not found; child output may arrive in large batches");
            Command::new(binary)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("failed to launch {}", binary.display()))?
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to launch {}", binary.display()));
        }
    };

    let stdin = child.stdin.take();
    Ok(RunningChild { child, stdin })
}

impl RunningChild {
    /// Take the stdout pipe. Panics if called twice; the multiplexer is the
    /// single reader.
    pub fn take_stdout(&mut self) -> ChildStdout {
        self.child.stdout.take().expect("stdout already taken")
    }

    /// Take the stderr pipe. Single reader, same as stdout.
    pub fn take_stderr(&mut self) -> ChildStderr {
        self.child.stderr.take().expect("stderr already taken")
    }

    /// Write one line of user input to the child's stdin.
    pub fn write_input(&mut self, text: &str) -> Result<(), SupervisorError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SupervisorError::PipeClosed);
        };

        let mut line = text.to_string();
        line.push('\n');
        match stdin.write_all(line.as_bytes()).and_then(|()| stdin.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(SupervisorError::PipeClosed)
            }
            Err(e) => Err(SupervisorError::Io(e)),
        }
    }

    /// Non-blocking exit check.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("try_wait failed: {e}");
                None
            }
        }
    }

    /// Ask the child to terminate; escalate to SIGKILL after the grace
    /// period. Best-effort — failures are logged, never propagated, so
    /// cleanup is never blocked by a stubborn process.
    pub fn terminate(&mut self) {
        if self.try_exit().is_some() {
            return;
        }

        // Closing stdin first gives read-blocked programs an EOF to exit on.
        self.stdin = None;

        #[cfg(unix)]
        {
            let pid = self.child.id() as i32;
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                warn!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
            }
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if self.try_exit().is_some() {
                debug!("child exited within grace period");
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        if let Err(e) = self.child.kill() {
            warn!("force kill failed: {e}");
        }
        let _ = self.child.wait();
    }
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        // Last-resort reap so an abandoned handle never leaks a process.
        if self.try_exit().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn compile_fixture(source_text: &str) -> (tempfile::TempDir, CompileOutcome, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("prog.c");
        let bin = tmp.path().join("prog");
        std::fs::write(&src, source_text).unwrap();
        let outcome = compile("cc", &[], &src, &bin).unwrap();
        (tmp, outcome, bin)
    }

    #[test]
    fn compile_success_produces_binary() {
        let (_tmp, outcome, bin) =
            compile_fixture("#include <stdio.h>\nint main(){printf(\"hi\\n\");return 0;}\n");
        assert!(matches!(outcome, CompileOutcome::Success));
        assert!(bin.exists());
    }

    #[test]
    fn compile_failure_captures_diagnostic() {
        let (_tmp, outcome, bin) = compile_fixture("int main( { this is not C\n");
        match outcome {
            CompileOutcome::Failed { diagnostic } => {
                assert!(!diagnostic.is_empty());
            }
            CompileOutcome::Success => panic!("expected compile failure"),
        }
        assert!(!bin.exists());
    }

    #[test]
    fn whitespace_issue_detected_in_stray_diagnostic() {
        let diag = "prog.c:1:4: error: stray \u{2018}\\302\u{2019} in program";
        assert!(looks_like_whitespace_issue(diag));
        assert!(!looks_like_whitespace_issue("prog.c:1:1: error: expected ';'"));
    }

    #[test]
    fn launch_and_read_output() {
        let (_tmp, outcome, bin) =
            compile_fixture("#include <stdio.h>\nint main(){printf(\"hello\\n\");return 0;}\n");
        assert!(matches!(outcome, CompileOutcome::Success));

        let mut child = launch(&bin).unwrap();
        let mut stdout = child.take_stdout();
        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello\n");

        // Wait for exit.
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_exit() {
                assert!(status.success());
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "child never exited");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn write_input_reaches_child() {
        // cat echoes stdin back; one line in, one line out.
        let (_tmp, outcome, bin) = compile_fixture(
            "#include <stdio.h>\nint main(){char b[128];if(fgets(b,sizeof b,stdin))fputs(b,stdout);return 0;}\n",
        );
        assert!(matches!(outcome, CompileOutcome::Success));

        let mut child = launch(&bin).unwrap();
        let mut stdout = child.take_stdout();
        child.write_input("ping").unwrap();

        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        assert_eq!(out, "ping\n");
    }

    #[test]
    fn write_input_after_exit_is_pipe_closed() {
        let (_tmp, outcome, bin) = compile_fixture("int main(){return 0;}\n");
        assert!(matches!(outcome, CompileOutcome::Success));

        let mut child = launch(&bin).unwrap();
        // Wait for the child to finish, then keep writing until the pipe
        // breaks (the first write may land in the kernel buffer).
        while child.try_exit().is_none() {
            std::thread::sleep(Duration::from_millis(20));
        }
        let mut saw_closed = false;
        for _ in 0..64 {
            match child.write_input("too late") {
                Err(SupervisorError::PipeClosed) => {
                    saw_closed = true;
                    break;
                }
                Err(SupervisorError::Io(_)) | Ok(()) => continue,
            }
        }
        assert!(saw_closed, "expected PipeClosed after child exit");
    }

    #[test]
    fn terminate_kills_blocked_child() {
        // Blocks forever on a read; terminate must reclaim it.
        let (_tmp, outcome, bin) =
            compile_fixture("#include <stdio.h>\nint main(){getchar();getchar();for(;;);}\n");
        assert!(matches!(outcome, CompileOutcome::Success));

        let mut child = launch(&bin).unwrap();
        assert!(child.try_exit().is_none());
        let start = Instant::now();
        child.terminate();
        // Grace period plus slack.
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(child.try_exit().is_some());
    }

    #[test]
    fn terminate_twice_is_harmless() {
        let (_tmp, outcome, bin) = compile_fixture("int main(){return 0;}\n");
        assert!(matches!(outcome, CompileOutcome::Success));
        let mut child = launch(&bin).unwrap();
        child.terminate();
        child.terminate();
    }
}
