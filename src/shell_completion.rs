//! Shell completion generation.
//!
//! `crunner completions bash > /etc/bash_completion.d/crunner` (or the zsh /
//! fish equivalent). The scripts are generated from the clap command tree,
//! so they track `cli.rs` without maintenance.

use std::io;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::{Cli, CompletionShell};

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
        }
    }
}

pub fn print(shell: CompletionShell) -> Result<()> {
    write_script(shell, &mut io::stdout())
}

fn write_script(shell: CompletionShell, out: &mut dyn io::Write) -> Result<()> {
    let mut cmd = Cli::command();
    generate(Shell::from(shell), &mut cmd, "crunner", out);
    Ok(())
}
