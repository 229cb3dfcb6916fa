use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".crunner";

fn default_compiler_program() -> String {
    "cc".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["-O0".to_string(), "-Wall".to_string()]
}

fn default_poll_timeout_millis() -> u64 {
    200
}

fn default_session_idle_timeout_secs() -> u64 {
    600
}

fn default_renderer_program() -> String {
    "pandoc".to_string()
}

/// Fixed compile invocation: `<program> <args…> <source> -o <binary>`.
#[derive(Debug, Deserialize)]
pub struct CompilerConfig {
    #[serde(default = "default_compiler_program")]
    pub program: String,
    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: default_compiler_program(),
            args: default_compiler_args(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Multiplexer cycle timeout — also the idle-detection window.
    #[serde(default = "default_poll_timeout_millis")]
    pub poll_timeout_millis: u64,
    /// Whole-session inactivity limit before forced termination.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

impl RunnerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_millis)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_millis: default_poll_timeout_millis(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

/// Telegram access control.
///
/// ```toml
/// [telegram]
/// allowed_users = ["alice", "123456789"]
/// ```
///
/// The bot token itself is never stored in the config file; it comes from
/// the `TELEGRAM_BOT_TOKEN` environment variable or the `--token` flag.
#[derive(Debug, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    /// External markdown-to-PDF renderer; absence degrades to markdown-only.
    #[serde(default = "default_renderer_program")]
    pub renderer: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            renderer: default_renderer_program(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl BotConfig {
    /// Search upward from `start` for a `.crunner/config.toml` file and load
    /// it. Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: BotConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((BotConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = BotConfig::default();
        assert_eq!(config.compiler.program, "cc");
        assert_eq!(config.compiler.args, vec!["-O0", "-Wall"]);
        assert_eq!(config.runner.poll_timeout(), Duration::from_millis(200));
        assert_eq!(config.runner.session_idle_timeout(), Duration::from_secs(600));
        assert!(config.telegram.allowed_users.is_empty());
        assert_eq!(config.report.renderer, "pandoc");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[compiler]
program = "gcc"
args = ["-std=c11"]

[runner]
poll_timeout_millis = 100
session_idle_timeout_secs = 120

[telegram]
allowed_users = ["alice", "42"]

[report]
renderer = "wkhtmltopdf"
"#;
        let config: BotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.compiler.program, "gcc");
        assert_eq!(config.compiler.args, vec!["-std=c11"]);
        assert_eq!(config.runner.poll_timeout_millis, 100);
        assert_eq!(config.runner.session_idle_timeout_secs, 120);
        assert_eq!(config.telegram.allowed_users, vec!["alice", "42"]);
        assert_eq!(config.report.renderer, "wkhtmltopdf");
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[compiler]
program = "clang"
"#;
        let config: BotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.compiler.program, "clang");
        assert_eq!(config.compiler.args, vec!["-O0", "-Wall"]);
        assert_eq!(config.runner.poll_timeout_millis, 200);
        assert_eq!(config.report.renderer, "pandoc");
    }

    #[test]
    fn load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crunner");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[runner]
session_idle_timeout_secs = 60
"#,
        )
        .unwrap();

        let (config, path) = BotConfig::load(tmp.path()).unwrap();
        assert!(path.is_some());
        assert_eq!(config.runner.session_idle_timeout_secs, 60);
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = BotConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.compiler.program, "cc");
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crunner");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[compiler]
program = "tcc"
"#,
        )
        .unwrap();

        let nested = tmp.path().join("src").join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = BotConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.compiler.program, "tcc");
    }
}
