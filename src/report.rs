//! End-of-session report rendering.
//!
//! The markdown variant is pure and always available. The PDF variant
//! shells out to an external renderer (pandoc by default); when that is
//! missing or fails, delivery degrades to the markdown document — a render
//! problem never fails the session.

use std::path::Path;
use std::process::{Command, Stdio};

use chrono::Local;
use thiserror::Error;
use tracing::debug;

use crate::transcript::Transcript;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The renderer executable is not on PATH.
    #[error("document renderer not available")]
    Unavailable,

    #[error("document renderer failed: {0}")]
    Failed(String),
}

/// Render the session transcript as a markdown document.
pub fn render_markdown(source: &str, transcript: &Transcript) -> String {
    let mut out = String::new();
    out.push_str("# Run report\n\n");
    out.push_str(&format!(
        "Generated {}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    out.push_str("## Source\n\n```c\n");
    out.push_str(source);
    if !source.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n\n");

    out.push_str("## Session transcript\n\n");
    if transcript.is_empty() {
        out.push_str("_(empty)_\n");
    } else {
        for entry in transcript.entries() {
            out.push_str(&format!(
                "- `{}` **{}** {}\n",
                entry.timestamp.format("%H:%M:%S"),
                entry.kind.label(),
                entry.text
            ));
        }
    }
    out
}

/// Render markdown to PDF via the external renderer.
///
/// Writes `markdown` to a sibling `.md` file of `output` and invokes
/// `<renderer> <md> -o <output>`.
pub fn render_pdf(renderer: &str, markdown: &str, output: &Path) -> Result<(), RenderError> {
    let md_path = output.with_extension("md");
    std::fs::write(&md_path, markdown).map_err(|e| RenderError::Failed(e.to_string()))?;

    let result = Command::new(renderer)
        .arg(&md_path)
        .arg("-o")
        .arg(output)
        .stdin(Stdio::null())
        .output();

    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RenderError::Unavailable),
        Err(e) => Err(RenderError::Failed(e.to_string())),
        Ok(out) if !out.status.success() => {
            Err(RenderError::Failed(String::from_utf8_lossy(&out.stderr).into_owned()))
        }
        Ok(_) => {
            debug!(output = %output.display(), "report rendered");
            Ok(())
        }
    }
}

/// Probe whether the renderer executable resolves on PATH.
pub fn renderer_available(renderer: &str) -> bool {
    Command::new(renderer)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::EntryKind;

    fn sample_transcript() -> Transcript {
        let mut t = Transcript::new();
        t.push(EntryKind::System, "compiling submission");
        t.push(EntryKind::Prompt, "Enter a number:");
        t.push(EntryKind::Input, "7");
        t.push(EntryKind::Output, "got 7");
        t.push(EntryKind::System, "program finished (exit code 0)");
        t
    }

    #[test]
    fn markdown_contains_source_and_transcript() {
        let md = render_markdown("int main(){return 0;}", &sample_transcript());
        assert!(md.contains("```c\nint main(){return 0;}\n```"));
        assert!(md.contains("**prompt** Enter a number:"));
        assert!(md.contains("**input** 7"));
        assert!(md.contains("**output** got 7"));
    }

    #[test]
    fn markdown_entries_keep_transcript_order() {
        let md = render_markdown("", &sample_transcript());
        let prompt = md.find("Enter a number").unwrap();
        let input = md.find("**input** 7").unwrap();
        let output = md.find("got 7").unwrap();
        assert!(prompt < input && input < output);
    }

    #[test]
    fn markdown_handles_empty_transcript() {
        let md = render_markdown("x", &Transcript::new());
        assert!(md.contains("_(empty)_"));
    }

    #[test]
    fn missing_renderer_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("report.pdf");
        let err = render_pdf("definitely-not-a-renderer-binary", "# hi", &out).unwrap_err();
        assert!(matches!(err, RenderError::Unavailable));
    }

    #[test]
    fn failing_renderer_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("report.pdf");
        // `false` accepts any args and exits non-zero.
        let err = render_pdf("false", "# hi", &out).unwrap_err();
        assert!(matches!(err, RenderError::Failed(_)));
    }

    #[test]
    fn renderer_probe_false_for_missing_binary() {
        assert!(!renderer_available("definitely-not-a-renderer-binary"));
    }
}
