use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "crunner",
    about = "Telegram bot that compiles C submissions and runs them interactively",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bot and poll for messages
    Serve {
        /// Bot API token; falls back to the TELEGRAM_BOT_TOKEN environment
        /// variable
        #[arg(long)]
        token: Option<String>,
    },

    /// Show effective configuration
    Config {
        /// Emit JSON instead of the human-readable listing
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
