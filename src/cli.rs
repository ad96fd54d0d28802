//! Command-line interface definitions for the `tda` tool.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Java thread dump analyzer
#[derive(Parser, Debug)]
#[command(
    name = "tda",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TDA_GIT_SHA"), ")"),
    about,
    long_about = None
)]
#[command(
    after_help = "EXAMPLES:\n    tda threads.log\n    tda threads.log deadlocks\n    tda --json threads.log long-running\n    tda threads.log native-threads --dump 1"
)]
pub struct Cli {
    /// Log file containing one or more thread dumps
    #[arg(value_name = "FILE", required_unless_present_any = ["print_config", "completions"])]
    pub file: Option<PathBuf>,

    /// Analysis to run (default: summary)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output as JSON
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Log parser progress and recovered oddities to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Output default configuration to stdout
    #[arg(long)]
    pub print_config: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Cli {
    /// The requested analysis, `summary` when none was given.
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Summary)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the parsed dumps
    Summary,
    /// Report deadlocks in every dump
    Deadlocks,
    /// Threads that stay active across all dumps
    LongRunning,
    /// Carrier threads stuck in application code
    VirtualThreads,
    /// Threads currently inside a native method
    NativeThreads {
        /// Index of the dump (0-based)
        #[arg(long, short = 'd', default_value = "0", value_name = "N")]
        dump: usize,
    },
    /// SMR addresses that match no thread
    Zombies,
    /// Diagnostic hints for one dump
    Hints {
        /// Index of the dump (0-based)
        #[arg(long, short = 'd', default_value = "0", value_name = "N")]
        dump: usize,
    },
    /// HTML overview of one dump
    Overview {
        /// Index of the dump (0-based)
        #[arg(long, short = 'd', default_value = "0", value_name = "N")]
        dump: usize,
    },
}
