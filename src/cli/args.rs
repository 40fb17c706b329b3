//! CLI argument parsing.

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

/// Main CLI structure for veto.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "veto",
    version,
    about = "Authorization kernel for AI coding agents",
    long_about = "Compile plain-language restrictions into enforced policies, \
                  run agents behind a decision daemon and command shims, and \
                  repair protected files after unauthorized changes."
)]
pub struct Cli {
    /// Workspace root (default: current directory)
    #[arg(long, global = true, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub workspace: Option<PathBuf>,

    /// Log instead of enforcing: denies become annotated allows
    #[arg(long, global = true)]
    pub log_only: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile restrictions, spawn the daemon, and run the agent shimmed
    Run {
        /// Agent command to wrap (claude, cursor, aider, or any binary)
        agent: String,
        /// Restriction phrases, e.g. "no lodash" "protect .env"
        #[arg(required = true)]
        restrictions: Vec<String>,
    },
    /// Print the compiled policy for a restriction without spawning
    Explain {
        restriction: String,
    },
    /// Persist a compiled policy to the user config
    Add {
        restriction: String,
    },
    /// List stored policies
    List,
    /// Write integration files for an agent
    Install {
        agent: String,
    },
    /// Remove an agent's integration files, restoring the prior state
    Uninstall {
        agent: String,
    },
    /// Watchdog mode only: snapshot, watch, and restore (no wrapping)
    Watch {
        restriction: String,
    },
    /// Summarize live sessions
    Status,
    /// Clear the compilation cache
    Clear,
    /// Hook-script endpoint: JSON on stdin, decision JSON on stdout
    #[command(hide = true)]
    Hook,
    /// `veto <agent> "<restriction>"` shorthand for `veto run`
    #[command(external_subcommand)]
    External(Vec<String>),
}
