//! Append-only session transcript.
//!
//! Every observable event in a session — program output, detected prompts,
//! forwarded input, stderr records, lifecycle notices — lands here in the
//! order the multiplexer observed it. The transcript is read only after the
//! session terminates, when the report is rendered.

use chrono::{DateTime, Local};
use serde::Serialize;

/// What kind of event a transcript entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    System,
    Error,
    Output,
    Prompt,
    Input,
}

impl EntryKind {
    /// Label shown in the rendered report.
    pub fn label(self) -> &'static str {
        match self {
            EntryKind::System => "system",
            EntryKind::Error => "stderr",
            EntryKind::Output => "output",
            EntryKind::Prompt => "prompt",
            EntryKind::Input => "input",
        }
    }
}

/// One timestamped transcript line. The timestamp is used for display
/// ordering in the report only, never for correctness logic.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub kind: EntryKind,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

/// Ordered, append-only record of one session.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<LogEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntryKind, text: impl Into<String>) {
        self.entries.push(LogEntry {
            kind,
            text: text.into(),
            timestamp: Local::now(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let mut t = Transcript::new();
        t.push(EntryKind::System, "compiling");
        t.push(EntryKind::Output, "hi");
        t.push(EntryKind::System, "done");

        let kinds: Vec<_> = t.entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::System, EntryKind::Output, EntryKind::System]
        );
        assert_eq!(t.entries()[1].text, "hi");
    }

    #[test]
    fn timestamps_are_monotone_nondecreasing() {
        let mut t = Transcript::new();
        for i in 0..5 {
            t.push(EntryKind::Output, format!("line {i}"));
        }
        for pair in t.entries().windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn kind_labels() {
        assert_eq!(EntryKind::Error.label(), "stderr");
        assert_eq!(EntryKind::Prompt.label(), "prompt");
    }

    #[test]
    fn entry_serializes_with_snake_case_kind() {
        let mut t = Transcript::new();
        t.push(EntryKind::Prompt, "Enter a number:");
        let json = serde_json::to_string(&t.entries()[0]).unwrap();
        assert!(json.contains("\"kind\":\"prompt\""));
        assert!(json.contains("Enter a number:"));
    }
}
