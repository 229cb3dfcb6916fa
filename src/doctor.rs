//! Startup dependency checks.
//!
//! The compiler is a hard requirement — without it no session can do
//! anything, so its absence aborts startup. The document renderer is
//! optional; without it reports degrade to the markdown-only path.

use std::process::{Command, Stdio};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::report;

/// Probe a tool by running it with a benign flag.
fn command_exists(program: &str, check_arg: &str) -> bool {
    Command::new(program)
        .arg(check_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Verify external executables before accepting any session.
///
/// Returns whether the document renderer is usable.
pub fn check_startup_dependencies(config: &BotConfig) -> Result<bool> {
    if !command_exists(&config.compiler.program, "--version") {
        anyhow::bail!(
            "required compiler '{}' not found on PATH — install it or set [compiler].program in .crunner/config.toml",
            config.compiler.program
        );
    }
    info!(compiler = %config.compiler.program, "compiler found");

    let renderer_ok = report::renderer_available(&config.report.renderer);
    if renderer_ok {
        info!(renderer = %config.report.renderer, "document renderer found");
    } else {
        warn!(
            renderer = %config.report.renderer,
            "document renderer not found — reports will be markdown only"
        );
    }
    Ok(renderer_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_command_is_detected() {
        assert!(command_exists("sh", "-c"));
    }

    #[test]
    fn missing_command_is_detected() {
        assert!(!command_exists("definitely-not-a-real-compiler", "--version"));
    }

    #[test]
    fn missing_compiler_is_fatal() {
        let mut config = BotConfig::default();
        config.compiler.program = "definitely-not-a-real-compiler".to_string();
        let err = check_startup_dependencies(&config).unwrap_err();
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[test]
    fn missing_renderer_degrades_instead_of_failing() {
        let mut config = BotConfig::default();
        config.report.renderer = "definitely-not-a-real-renderer".to_string();
        let renderer_ok = check_startup_dependencies(&config).unwrap();
        assert!(!renderer_ok);
    }
}
