mod channel;
mod cli;
mod config;
mod doctor;
mod framer;
mod multiplexer;
mod normalize;
mod orchestrator;
mod report;
mod session;
mod shell_completion;
mod supervisor;
mod transcript;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use channel::ChatChannel;
use channel::telegram::TelegramChannel;
use cli::{Cli, Command};
use config::BotConfig;
use orchestrator::Bot;

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults — no .crunner/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<26} {value}\n"));
}

fn render_config_human(config: &BotConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Compiler\n");
    push_kv(&mut output, "program", &config.compiler.program);
    if config.compiler.args.is_empty() {
        push_kv(&mut output, "args", "(none)");
    } else {
        push_kv(&mut output, "args", config.compiler.args.join(", "));
    }
    output.push('\n');

    output.push_str("Runner\n");
    push_kv(
        &mut output,
        "poll_timeout",
        format!("{}ms", config.runner.poll_timeout_millis),
    );
    push_kv(
        &mut output,
        "session_idle_timeout",
        format!("{}s", config.runner.session_idle_timeout_secs),
    );
    output.push('\n');

    output.push_str("Telegram\n");
    if config.telegram.allowed_users.is_empty() {
        push_kv(&mut output, "allowed_users", "(none)");
    } else {
        push_kv(
            &mut output,
            "allowed_users",
            config.telegram.allowed_users.join(", "),
        );
    }
    output.push('\n');

    output.push_str("Report\n");
    push_kv(&mut output, "renderer", &config.report.renderer);
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &BotConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "compiler": {
            "program": &config.compiler.program,
            "args": &config.compiler.args
        },
        "runner": {
            "poll_timeout_millis": config.runner.poll_timeout_millis,
            "session_idle_timeout_secs": config.runner.session_idle_timeout_secs
        },
        "telegram": {
            "allowed_users": &config.telegram.allowed_users
        },
        "report": {
            "renderer": &config.report.renderer
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn resolve_token(flag: Option<String>) -> Result<String> {
    if let Some(token) = flag {
        return Ok(token);
    }
    std::env::var("TELEGRAM_BOT_TOKEN")
        .context("no bot token — pass --token or set TELEGRAM_BOT_TOKEN")
}

fn serve(config: BotConfig, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let renderer_ok = doctor::check_startup_dependencies(&config)?;

    if config.telegram.allowed_users.is_empty() {
        warn!(
            "[telegram].allowed_users is empty — every message will be ignored; \
             add usernames or \"*\" to .crunner/config.toml"
        );
    }

    let channel = Arc::new(TelegramChannel::new(
        token,
        config.telegram.allowed_users.clone(),
    ));
    channel.health_check()?;

    let bot = Arc::new(Bot::new(
        Arc::new(config),
        channel.clone() as Arc<dyn ChatChannel>,
        renderer_ok,
    ));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    info!("bot is up, polling for messages");
    let mut offset = 0i64;
    while !shutdown.load(Ordering::SeqCst) {
        match channel.poll_updates(&mut offset) {
            Ok(messages) => {
                for message in messages {
                    bot.handle_message(&message.chat_id, &message.text);
                }
            }
            Err(e) => {
                warn!("poll cycle failed: {e:#}");
                std::thread::sleep(Duration::from_secs(5));
            }
        }
        bot.sweep_idle();
    }

    info!("shutting down");
    bot.shutdown_all();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_quiet_command = matches!(
        &cli.command,
        Command::Config { .. } | Command::Completions { .. }
    );

    let filter = match cli.verbose {
        0 if is_quiet_command => "crunner=warn",
        0 => "crunner=info",
        1 => "crunner=debug",
        _ => "crunner=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = BotConfig::load(&cwd)?;

    if !is_quiet_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .crunner/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Serve { token } => serve(config, token)?,
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
        Command::Completions { shell } => shell_completion::print(shell)?,
    }

    Ok(())
}
