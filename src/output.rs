//! Terminal output formatting.

use colored::Colorize;
use serde::Serialize;

use crate::analyzer::Hints;
use crate::category::ResultNode;
use crate::parser::ParserKind;
use crate::session::{DumpSummary, NativeThread, ZombieThread};

/// Widest column used for wrapped text.
const MAX_WIDTH: usize = 100;

fn width() -> usize {
    textwrap::termwidth().min(MAX_WIDTH)
}

/// Shorten `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{keep}...")
}

/// Print any result as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_heading(title: &str) {
    println!();
    println!("{} {}", "▸".cyan(), title.cyan().bold());
}

/// One summary table row, without color.
pub fn format_summary_row(dump: &DumpSummary) -> String {
    format!(
        "{:>3}  {:14} {:24} {:>7} {:>7} {:>9}",
        dump.index,
        truncate(&dump.name, 14),
        truncate(dump.time.as_deref().unwrap_or("-"), 24),
        dump.thread_count,
        dump.virtual_thread_count,
        dump.deadlock_count
    )
}

pub fn print_summary(file: &str, kind: ParserKind, dumps: &[DumpSummary]) {
    print_heading(&format!("{file} ({kind})"));
    if dumps.is_empty() {
        println!("  {}", "No thread dumps found.".dimmed());
        println!();
        return;
    }

    println!(
        "  {}",
        format!(
            "{:>3}  {:14} {:24} {:>7} {:>7} {:>9}",
            "#", "Dump", "Time", "Threads", "Virtual", "Deadlocks"
        )
        .dimmed()
    );
    println!("  {}", "─".repeat(70).dimmed());
    for dump in dumps {
        let row = format_summary_row(dump);
        if dump.deadlock_count > 0 {
            println!("  {}", row.red());
        } else {
            println!("  {row}");
        }
    }

    let with_smr = dumps.iter().filter(|dump| dump.smr_info.is_some()).count();
    if with_smr > 0 {
        println!();
        println!(
            "  {} {}",
            "SMR info:".blue().bold(),
            format!("present in {with_smr} dump(s), run `zombies` to check it").bright_white()
        );
    }
    println!();
}

/// Messages of a session analysis. `found` selects the highlight color.
pub fn print_messages(title: &str, messages: &[String], found: bool) {
    print_heading(title);
    let width = width().saturating_sub(4);
    for message in messages {
        let mut lines = textwrap::wrap(message, width).into_iter();
        if let Some(first) = lines.next() {
            let bullet = if found { "●".red() } else { "●".green() };
            println!("  {bullet} {first}");
        }
        for line in lines {
            println!("    {line}");
        }
    }
    println!();
}

/// Long-running result tree: one entry per thread, one line per dump.
pub fn print_long_running(root: &ResultNode) {
    print_heading(&root.label);
    for thread in &root.children {
        println!("  {} {}", "●".yellow(), thread.label.bold());
        for dump in &thread.children {
            println!("      {}", dump.label.dimmed());
        }
    }
    println!();
}

pub fn print_native_threads(dump_name: &str, threads: &[NativeThread]) {
    print_heading(&format!("Native method threads in {dump_name}"));
    if threads.is_empty() {
        println!("  {}", "No threads in native methods.".dimmed());
        println!();
        return;
    }
    for thread in threads {
        println!(
            "  {} {} {}",
            "●".blue(),
            thread.name.bold(),
            format!("[{}]", thread.state).dimmed()
        );
        println!("      {}", thread.native_method.cyan());
    }
    println!();
}

pub fn print_zombies(zombies: &[ZombieThread]) {
    print_heading("Zombie threads");
    if zombies.is_empty() {
        println!("  {}", "No zombie threads found.".green());
        println!();
        return;
    }
    println!(
        "  {}",
        format!("{:20} {:14} {}", "Address", "Dump", "Time").dimmed()
    );
    println!("  {}", "─".repeat(60).dimmed());
    for zombie in zombies {
        println!(
            "  {} {:14} {}",
            format!("{:20}", zombie.address).yellow(),
            zombie.dump_name,
            zombie.timestamp.dimmed()
        );
    }
    println!();
}

pub fn print_hints(dump_name: &str, hints: &Hints) {
    print_heading(&format!("Hints for {dump_name}"));
    if hints.is_empty() {
        println!("  {}", "Nothing suspicious found.".green());
        println!();
        return;
    }
    let width = width().saturating_sub(4);
    for hint in hints.iter() {
        let mut lines = textwrap::wrap(&hint.message, width).into_iter();
        if let Some(first) = lines.next() {
            println!("  {} {}", "!".yellow().bold(), first);
        }
        for line in lines {
            println!("    {line}");
        }
    }
    println!();
}
