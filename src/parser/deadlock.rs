//! Deadlock report extraction.
//!
//! HotSpot appends a report after the threads when it detects a cycle:
//!
//! ```text
//! Found one Java-level deadlock:
//! =============================
//! "Thread-1":
//!   waiting to lock monitor 0x00007f3b4c003f08 (object 0x000000076ab62208, a java.lang.Object),
//!   which is held by "Thread-0"
//! "Thread-0":
//!   ...
//!
//! Java stack information for the threads listed above:
//! ===================================================
//! "Thread-1":
//!         at Deadlock$2.run(Deadlock.java:30)
//!         - waiting to lock <0x000000076ab62208> (a java.lang.Object)
//!
//! Found 1 deadlock.
//! ```
//!
//! JRockit prints `Circular (deadlocked) lock chains` followed by
//! `Chain N:` blocks naming one thread per line.

use once_cell::sync::Lazy;
use regex::Regex;

pub const SUN_BANNER: &str = "Found one Java-level deadlock:";
pub const BEA_BANNER: &str = "Circular (deadlocked) lock chains";

static CYCLE_MEMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(.+)":\s*$"#).unwrap());

static FOUND_N: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Found (\d+) deadlocks?\.").unwrap());

static BEA_CHAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Chain \d+:").unwrap());

static BEA_MEMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*"([^"]+)"\s"#).unwrap());

/// Deadlock cycles of one dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadlockReport {
    /// Thread names per cycle, in report order
    pub cycles: Vec<Vec<String>>,
    /// Per-thread stack blocks from the report, keyed by name
    pub stacks: Vec<(String, String)>,
}

impl DeadlockReport {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// `Deadlocks (1 deadlock: Thread-1 -> Thread-0 -> Thread-1)`
    pub fn category_name(&self) -> String {
        let noun = if self.cycles.len() == 1 { "deadlock" } else { "deadlocks" };
        let cycles: Vec<String> = self
            .cycles
            .iter()
            .map(|cycle| {
                let mut names = cycle.clone();
                if let Some(first) = cycle.first() {
                    names.push(first.clone());
                }
                names.join(" -> ")
            })
            .collect();
        format!("Deadlocks ({} {noun}: {})", self.cycles.len(), cycles.join("; "))
    }

    pub fn stack_of(&self, name: &str) -> Option<&str> {
        self.stacks
            .iter()
            .find(|(thread, _)| thread == name)
            .map(|(_, stack)| stack.as_str())
    }

    /// Every thread involved, each once, in first-seen order.
    pub fn thread_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.cycles.iter().flatten() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Cycle,
    Stacks,
    Done,
}

/// Incremental parser for the HotSpot report, fed line by line.
#[derive(Debug)]
pub struct DeadlockParser {
    report: DeadlockReport,
    current: Vec<String>,
    stack: Option<(String, String)>,
    phase: Phase,
}

impl Default for DeadlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlockParser {
    pub fn new() -> Self {
        Self {
            report: DeadlockReport::default(),
            current: Vec::new(),
            stack: None,
            phase: Phase::Cycle,
        }
    }

    pub fn is_banner(line: &str) -> bool {
        line.trim_start().starts_with(SUN_BANNER)
    }

    /// Feed one line. Returns `false` once the closing `Found N deadlock(s).` was seen.
    pub fn push_line(&mut self, line: &str) -> bool {
        let trimmed = line.trim();
        if Self::is_banner(trimmed) {
            self.close_cycle();
            self.close_stack();
            self.phase = Phase::Cycle;
            return true;
        }
        if let Some(caps) = FOUND_N.captures(trimmed) {
            self.close_cycle();
            self.close_stack();
            if caps[1].parse::<usize>().ok() != Some(self.report.cycles.len()) {
                log::warn!(
                    "deadlock report announces {} deadlock(s) but {} cycle(s) were parsed",
                    &caps[1],
                    self.report.cycles.len()
                );
            }
            self.phase = Phase::Done;
            return false;
        }
        if trimmed.starts_with("Java stack information for the threads listed above") {
            self.close_cycle();
            self.phase = Phase::Stacks;
            return true;
        }
        if trimmed.starts_with("===") {
            return true;
        }

        match self.phase {
            Phase::Cycle => {
                if let Some(caps) = CYCLE_MEMBER.captures(trimmed) {
                    self.current.push(caps[1].to_string());
                }
            }
            Phase::Stacks => {
                if let Some(caps) = CYCLE_MEMBER.captures(trimmed) {
                    self.close_stack();
                    self.stack = Some((caps[1].to_string(), format!("{line}\n")));
                } else if let Some((_, text)) = self.stack.as_mut() {
                    if !trimmed.is_empty() {
                        text.push_str(line);
                        text.push('\n');
                    }
                }
            }
            Phase::Done => return false,
        }
        true
    }

    fn close_cycle(&mut self) {
        if !self.current.is_empty() {
            self.report.cycles.push(std::mem::take(&mut self.current));
        }
    }

    fn close_stack(&mut self) {
        if let Some(stack) = self.stack.take() {
            self.report.stacks.push(stack);
        }
    }

    /// Finish, also when the stream ended before the closing line.
    pub fn finish(mut self) -> DeadlockReport {
        self.close_cycle();
        self.close_stack();
        self.report
    }
}

/// Parse the JRockit `Circular (deadlocked) lock chains` section.
pub fn parse_bea_chains(lines: &[String]) -> DeadlockReport {
    let mut report = DeadlockReport::default();
    let mut current: Vec<String> = Vec::new();
    for line in lines {
        if BEA_CHAIN.is_match(line) {
            if !current.is_empty() {
                report.cycles.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(caps) = BEA_MEMBER.captures(line) {
            let name = caps[1].to_string();
            if !current.contains(&name) {
                current.push(name);
            }
        }
    }
    if !current.is_empty() {
        report.cycles.push(current);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"Found one Java-level deadlock:
=============================
"Thread-1":
  waiting to lock monitor 0x00007f3b4c003f08 (object 0x000000076ab62208, a java.lang.Object),
  which is held by "Thread-0"
"Thread-0":
  waiting to lock monitor 0x00007f3b4c006358 (object 0x000000076ab62218, a java.lang.Object),
  which is held by "Thread-1"

Java stack information for the threads listed above:
===================================================
"Thread-1":
	at Deadlock$2.run(Deadlock.java:30)
	- waiting to lock <0x000000076ab62208> (a java.lang.Object)
	- locked <0x000000076ab62218> (a java.lang.Object)
"Thread-0":
	at Deadlock$1.run(Deadlock.java:17)
	- waiting to lock <0x000000076ab62218> (a java.lang.Object)
	- locked <0x000000076ab62208> (a java.lang.Object)

Found 1 deadlock.
"#;

    fn parse(text: &str) -> DeadlockReport {
        let mut parser = DeadlockParser::new();
        for line in text.lines() {
            if !parser.push_line(line) {
                break;
            }
        }
        parser.finish()
    }

    #[test]
    fn test_single_cycle() {
        let report = parse(REPORT);
        assert_eq!(report.cycles, vec![vec!["Thread-1".to_string(), "Thread-0".to_string()]]);
        assert_eq!(
            report.category_name(),
            "Deadlocks (1 deadlock: Thread-1 -> Thread-0 -> Thread-1)"
        );
        let stack = report.stack_of("Thread-0").unwrap();
        assert!(stack.contains("Deadlock$1.run"));
        assert!(!stack.contains("Deadlock$2.run"));
    }

    #[test]
    fn test_closing_line_stops_parser() {
        let mut parser = DeadlockParser::new();
        for line in REPORT.lines().take_while(|l| !l.starts_with("Found 1")) {
            assert!(parser.push_line(line));
        }
        assert!(!parser.push_line("Found 1 deadlock."));
    }

    #[test]
    fn test_two_cycles() {
        let text = "Found one Java-level deadlock:\n=====\n\"a\":\n  which is held by \"b\"\n\"b\":\n  which is held by \"a\"\n\nFound one Java-level deadlock:\n=====\n\"c\":\n  which is held by \"d\"\n\"d\":\n  which is held by \"c\"\n\nJava stack information for the threads listed above:\n=====\n\"a\":\n\tat A.run(A.java:1)\n\nFound 2 deadlocks.\n";
        let report = parse(text);
        assert_eq!(report.cycles.len(), 2);
        assert_eq!(report.thread_names(), vec!["a", "b", "c", "d"]);
        assert!(report.category_name().starts_with("Deadlocks (2 deadlocks: a -> b -> a; c -> d -> c"));
    }

    #[test]
    fn test_truncated_report_keeps_cycles() {
        let truncated: Vec<&str> = REPORT.lines().take(8).collect();
        let report = parse(&truncated.join("\n"));
        assert_eq!(report.cycles.len(), 1);
        assert!(report.stacks.is_empty());
    }

    #[test]
    fn test_bea_chains() {
        let lines: Vec<String> = [
            "Chain 2:",
            "\"Thread-1\" id=12 idx=0x34 tid=5302 waiting for java/lang/Object@0x01F0B330 held by:",
            "\"Thread-0\" id=11 idx=0x30 tid=5301 waiting for java/lang/Object@0x01F0B338 held by:",
            "\"Thread-1\" id=12 idx=0x34 tid=5302",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let report = parse_bea_chains(&lines);
        assert_eq!(report.cycles, vec![vec!["Thread-1".to_string(), "Thread-0".to_string()]]);
    }
}
