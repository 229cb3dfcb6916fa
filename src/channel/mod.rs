//! Message channel boundary.
//!
//! The engine never talks to a transport directly; it sends user-visible
//! text and final report documents through this trait. The one production
//! implementation is the Telegram Bot API (`telegram`), tests use an
//! in-memory recorder.

pub mod telegram;

use anyhow::Result;

/// An inbound text message from a user.
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Conversation identifier — also the session key.
    pub chat_id: String,
    pub username: Option<String>,
    pub text: String,
}

/// Outbound operations the engine needs from a transport.
pub trait ChatChannel: Send + Sync {
    /// Plain text notification.
    fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Preformatted text (compiler diagnostics); the implementation owns
    /// whatever markup its transport needs.
    fn send_code_block(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Ship a generated report file.
    fn send_document(&self, chat_id: &str, bytes: &[u8], filename: &str) -> Result<()>;
}
