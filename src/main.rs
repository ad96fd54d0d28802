use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io;

use tda::analyzer::Hints;
use tda::cli::{Cli, Command};
use tda::config::{print_default_config, Config};
use tda::long_running::LongRunning;
use tda::output;
use tda::session::Session;

fn print_completions(shell: Shell) {
    let mut cmd = <Cli as CommandFactory>::command();
    generate(shell, &mut cmd, "tda", &mut io::stdout());
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(());
    }

    if cli.print_config {
        print_default_config();
        return Ok(());
    }

    let Some(file) = cli.file.as_deref() else {
        anyhow::bail!("no log file given");
    };

    let config = Config::load();
    let mut session = Session::from_config(&config).context("invalid configuration")?;
    let (kind, parsed) = session
        .parse_log_file(file)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    log::info!("{parsed} dump(s) in {}", file.display());

    match cli.subcommand() {
        Command::Summary => {
            let summary = session.dumps_summary();
            if cli.json {
                output::print_json(&summary)?;
            } else {
                output::print_summary(&file.display().to_string(), kind, &summary);
            }
        }
        Command::Deadlocks => {
            let found = session.dumps().iter().any(|dump| !dump.deadlocks.is_empty());
            report(cli.json, "Deadlocks", &session.check_for_deadlocks(), found)?;
        }
        Command::LongRunning => {
            let (root, outcome) = session.long_running_tree();
            match outcome {
                LongRunning::Matched(count) if count > 0 && cli.json => output::print_json(&root)?,
                LongRunning::Matched(count) if count > 0 => output::print_long_running(&root),
                _ => report(cli.json, "Long running threads", &session.find_long_running_threads(), false)?,
            }
        }
        Command::VirtualThreads => {
            let found = session
                .dumps()
                .iter()
                .any(|dump| !tda::Analyzer::new(dump).stuck_carrier_threads().is_empty());
            report(cli.json, "Virtual threads", &session.analyze_virtual_threads(), found)?;
        }
        Command::NativeThreads { dump } => {
            let threads = session.native_threads(dump)?;
            if cli.json {
                output::print_json(&threads)?;
            } else {
                output::print_native_threads(&session.dump(dump)?.name, &threads);
            }
        }
        Command::Zombies => {
            let zombies = session.zombie_threads();
            if cli.json {
                output::print_json(&zombies)?;
            } else {
                output::print_zombies(&zombies);
            }
        }
        Command::Hints { dump } => {
            let hints: Hints = session.hints(dump)?;
            if cli.json {
                output::print_json(&hints)?;
            } else {
                output::print_hints(&session.dump(dump)?.name, &hints);
            }
        }
        Command::Overview { dump } => {
            let dump = session.dump(dump)?;
            if cli.json {
                output::print_json(&serde_json::json!({
                    "name": dump.name,
                    "overview": dump.overview(),
                }))?;
            } else {
                println!("{}", dump.overview());
            }
        }
    }

    Ok(())
}

fn report(json: bool, title: &str, messages: &[String], found: bool) -> Result<()> {
    if json {
        output::print_json(messages)?;
    } else {
        output::print_messages(title, messages, found);
    }
    Ok(())
}
