//! Telegram Bot API transport — blocking long poll over ureq.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChatChannel, Incoming};

/// Long-poll window passed to getUpdates, seconds.
const POLL_WINDOW_SECS: u64 = 30;

pub struct TelegramChannel {
    bot_token: String,
    /// Usernames or numeric user ids; `*` allows everyone.
    allowed_users: Vec<String>,
    agent: ureq::Agent,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            // Must sit above the long-poll window or every quiet poll times out.
            .timeout_read(std::time::Duration::from_secs(POLL_WINDOW_SECS + 15))
            .build();
        Self {
            bot_token,
            allowed_users,
            agent,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn is_user_allowed(&self, identity: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == identity)
    }

    /// Check the token actually works before accepting sessions.
    pub fn health_check(&self) -> Result<()> {
        self.agent
            .get(&self.api_url("getMe"))
            .call()
            .context("telegram getMe failed — check the bot token")?;
        Ok(())
    }

    /// One long-poll cycle. Advances `offset` past every update seen, even
    /// the ones filtered out by the allow-list.
    pub fn poll_updates(&self, offset: &mut i64) -> Result<Vec<Incoming>> {
        let body = serde_json::json!({
            "offset": *offset,
            "timeout": POLL_WINDOW_SECS,
            "allowed_updates": ["message"],
        });

        let data: Value = self
            .agent
            .post(&self.api_url("getUpdates"))
            .send_json(body)
            .context("telegram getUpdates failed")?
            .into_json()
            .context("telegram getUpdates returned malformed JSON")?;

        let mut incoming = Vec::new();
        let Some(results) = data.get("result").and_then(Value::as_array) else {
            return Ok(incoming);
        };

        for update in results {
            if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                *offset = uid + 1;
            }

            let Some(message) = update.get("message") else {
                continue;
            };
            let Some(text) = message.get("text").and_then(Value::as_str) else {
                continue;
            };

            let username = message
                .pointer("/from/username")
                .and_then(Value::as_str)
                .map(str::to_string);
            let user_id = message
                .pointer("/from/id")
                .and_then(Value::as_i64)
                .map(|id| id.to_string());

            let allowed = username
                .iter()
                .chain(user_id.iter())
                .any(|id| self.is_user_allowed(id));
            if !allowed {
                warn!(
                    username = username.as_deref().unwrap_or("unknown"),
                    "ignoring message from unauthorized user"
                );
                continue;
            }

            let Some(chat_id) = message
                .pointer("/chat/id")
                .and_then(Value::as_i64)
                .map(|id| id.to_string())
            else {
                continue;
            };

            incoming.push(Incoming {
                chat_id,
                username,
                text: text.to_string(),
            });
        }

        debug!(count = incoming.len(), "telegram poll cycle");
        Ok(incoming)
    }
}

impl ChatChannel for TelegramChannel {
    fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.agent
            .post(&self.api_url("sendMessage"))
            .send_json(serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .context("telegram sendMessage failed")?;
        Ok(())
    }

    fn send_code_block(&self, chat_id: &str, text: &str) -> Result<()> {
        // HTML parse mode; the payload must be escaped or Telegram rejects
        // diagnostics containing '<'.
        self.agent
            .post(&self.api_url("sendMessage"))
            .send_json(serde_json::json!({
                "chat_id": chat_id,
                "text": format!("<pre>{}</pre>", escape_html(text)),
                "parse_mode": "HTML",
            }))
            .context("telegram sendMessage (code block) failed")?;
        Ok(())
    }

    fn send_document(&self, chat_id: &str, bytes: &[u8], filename: &str) -> Result<()> {
        let boundary = format!("crunner-{:016x}", std::process::id() as u64 ^ bytes.len() as u64);
        let body = multipart_document(&boundary, chat_id, filename, bytes);

        self.agent
            .post(&self.api_url("sendDocument"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .context("telegram sendDocument failed")?;
        Ok(())
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build a two-field multipart/form-data body: `chat_id` and `document`.
fn multipart_document(boundary: &str, chat_id: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut head = String::with_capacity(512);
    head.push_str(&format!("--{boundary}\r\n"));
    head.push_str("Content-Disposition: form-data; name=\"chat_id\"\r\n\r\n");
    head.push_str(&format!("{chat_id}\r\n"));
    head.push_str(&format!("--{boundary}\r\n"));
    head.push_str(&format!(
        "Content-Disposition: form-data; name=\"document\"; filename=\"{filename}\"\r\n"
    ));
    head.push_str("Content-Type: application/octet-stream\r\n\r\n");

    let mut body = Vec::with_capacity(head.len() + bytes.len() + 64);
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
