//! Pre-compile whitespace normalization.
//!
//! Source pasted into a chat client routinely picks up non-breaking spaces
//! and other invisible separator characters. gcc rejects those with a
//! "stray byte" diagnostic that means nothing to most users, so the text is
//! normalized to plain ASCII whitespace before it is ever written to disk.

/// Result of normalizing submitted source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub text: String,
    /// True when normalization altered the input — the session uses this to
    /// tell the user their paste contained non-standard whitespace.
    pub changed: bool,
}

/// Replace non-breaking spaces and Unicode separator characters with plain
/// spaces, and expand horizontal tabs to four spaces.
///
/// Newlines and carriage returns pass through untouched. Idempotent.
pub fn normalize_whitespace(input: &str) -> Normalized {
    let mut out = String::with_capacity(input.len());
    let mut changed = false;

    for c in input.chars() {
        match c {
            '\t' => {
                out.push_str("    ");
                changed = true;
            }
            ' ' | '\n' | '\r' => out.push(c),
            c if c.is_whitespace() => {
                // NBSP and the rest of the separator category.
                out.push(' ');
                changed = true;
            }
            c => out.push(c),
        }
    }

    Normalized { text: out, changed }
}
