//! Line framing and prompt classification for child process output.
//!
//! Pipes deliver bytes in arbitrary chunks; a line can arrive split across
//! any number of reads. The framer carries the unterminated tail between
//! chunks and emits only complete lines. Each complete line is classified as
//! a prompt or plain output — the label only changes how the line is shown
//! to the user, not how it is stored.

use regex::Regex;
use std::sync::LazyLock;

/// How a complete output line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Looks like the program is asking the user for something.
    Prompt,
    /// Ordinary program output.
    Output,
}

/// A complete line extracted from the stream, without its trailing newline.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub class: LineClass,
    pub text: String,
}

/// Classify a complete line.
///
/// A line is a prompt when it ends with `:`, `>` or `?` after trailing
/// whitespace is stripped, or when it contains one of the usual ask-words
/// case-insensitively. Heuristic by nature; empty lines are plain output.
pub fn classify(line: &str) -> LineClass {
    static ASK_WORDS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)enter|input|type").unwrap());

    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return LineClass::Output;
    }
    if trimmed.ends_with(':') || trimmed.ends_with('>') || trimmed.ends_with('?') {
        return LineClass::Prompt;
    }
    if ASK_WORDS.is_match(trimmed) {
        return LineClass::Prompt;
    }
    LineClass::Output
}

/// Accumulating line framer for one byte stream.
///
/// The internal buffer never contains a newline — it holds only the
/// frame-in-progress.
#[derive(Debug, Default)]
pub struct LineFramer {
    remainder: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of decoded output; returns every line completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Line> {
        self.remainder.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.remainder.find('\n') {
            let mut text: String = self.remainder.drain(..=pos).collect();
            text.pop(); // the newline
            if text.ends_with('\r') {
                text.pop();
            }
            lines.push(Line {
                class: classify(&text),
                text,
            });
        }
        lines
    }

    /// True when an unterminated line is pending.
    pub fn has_partial(&self) -> bool {
        !self.remainder.is_empty()
    }

    /// Flush the pending tail as a final line (used at process exit).
    pub fn take_remainder(&mut self) -> Option<Line> {
        if self.remainder.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.remainder);
        Some(Line {
            class: classify(&text),
            text,
        })
    }
}
