//! Heuristic analyzer: known problem signatures in a single dump.

use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::dump::{are_a_lot_of_waiting, escape_html, ThreadDumpInfo};

/// Phrase attached to carrier threads that keep a virtual thread mounted
/// while running application code.
pub const STUCK_CARRIER_PHRASE: &str = "carrier thread seems to be stuck in application code";

/// More monitors than this without a locking thread hints at a running GC.
const MONITORS_WITHOUT_LOCKS_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HintKind {
    StuckCarrier,
    Deadlock,
    Congestion,
    MonitorsWithoutLocks,
    ManyWaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hint {
    pub kind: HintKind,
    pub message: String,
}

/// Zero or more hints for one dump.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Hints {
    pub hints: Vec<Hint>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hint> {
        self.hints.iter()
    }

    /// Table rows for the dump overview.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for hint in &self.hints {
            let _ = write!(html, "<tr><td>{}</td></tr>", escape_html(&hint.message));
        }
        html
    }
}

impl fmt::Display for Hints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hint in &self.hints {
            writeln!(f, "{}", hint.message)?;
        }
        Ok(())
    }
}

type Check = fn(&ThreadDumpInfo) -> Option<Hint>;

const CHECKS: &[Check] = &[
    stuck_carriers,
    deadlocks,
    congested_monitors,
    monitors_without_locks,
    many_waiting,
];

pub struct Analyzer<'a> {
    dump: &'a ThreadDumpInfo,
}

impl<'a> Analyzer<'a> {
    pub fn new(dump: &'a ThreadDumpInfo) -> Self {
        Self { dump }
    }

    pub fn analyze_hints(&self) -> Hints {
        Hints {
            hints: CHECKS.iter().filter_map(|check| check(self.dump)).collect(),
        }
    }

    /// Names of threads flagged as stuck carriers, from either thread category.
    pub fn stuck_carrier_threads(&self) -> Vec<String> {
        stuck_carrier_names(self.dump)
    }
}

fn stuck_carrier_names(dump: &ThreadDumpInfo) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let threads = dump.threads.threads().into_iter();
    for thread in threads.chain(dump.virtual_threads.threads()) {
        if thread.content.contains(STUCK_CARRIER_PHRASE)
            && !names.iter().any(|name| name == thread.name())
        {
            names.push(thread.name().to_string());
        }
    }
    names
}

fn stuck_carriers(dump: &ThreadDumpInfo) -> Option<Hint> {
    let count = stuck_carrier_names(dump).len();
    (count > 0).then(|| Hint {
        kind: HintKind::StuckCarrier,
        message: format!(
            "Detected {count} virtual thread(s) where the {STUCK_CARRIER_PHRASE}. \
             A carrier running non-yielding code cannot be reused by other virtual threads; \
             check for long computations or pinning (synchronized blocks, native calls)."
        ),
    })
}

fn deadlocks(dump: &ThreadDumpInfo) -> Option<Hint> {
    (dump.deadlock_count > 0).then(|| Hint {
        kind: HintKind::Deadlock,
        message: format!(
            "Detected {} deadlock(s) involving {} thread(s). The affected threads will never proceed.",
            dump.deadlock_count,
            dump.deadlocks.len()
        ),
    })
}

fn congested_monitors(dump: &ThreadDumpInfo) -> Option<Hint> {
    let congested: Vec<String> = dump
        .monitors
        .monitors()
        .iter()
        .filter(|monitor| are_a_lot_of_waiting(monitor.waits()))
        .map(|monitor| monitor.title.clone())
        .collect();
    (!congested.is_empty()).then(|| Hint {
        kind: HintKind::Congestion,
        message: format!(
            "A lot of threads are waiting for {} monitor(s): {}. There might be a chain of waiting threads.",
            congested.len(),
            congested.join(", ")
        ),
    })
}

fn monitors_without_locks(dump: &ThreadDumpInfo) -> Option<Hint> {
    let count = dump.monitors_without_locks.len();
    (count > MONITORS_WITHOUT_LOCKS_THRESHOLD).then(|| Hint {
        kind: HintKind::MonitorsWithoutLocks,
        message: format!(
            "{count} monitors have no locking thread. The garbage collector might be running while the dump was taken."
        ),
    })
}

fn many_waiting(dump: &ThreadDumpInfo) -> Option<Hint> {
    let threads = dump.threads.len();
    let waiting = dump.waiting_threads.len();
    (threads > 0 && waiting * 2 > threads).then(|| Hint {
        kind: HintKind::ManyWaiting,
        message: format!(
            "{waiting} of {threads} threads are waiting for a monitor. Check the blocking monitors for a hot lock."
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{MonitorInfo, ThreadInfo};
    use crate::tokens::sun_thread_tokens;

    fn thread(header: &str, extra: &str) -> ThreadInfo {
        ThreadInfo::new(
            header.to_string(),
            format!("{header}\n{extra}"),
            1,
            sun_thread_tokens(header),
        )
    }

    #[test]
    fn test_clean_dump_has_no_hints() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        dump.threads
            .add_record(thread("\"main\" prio=5 tid=0x1 nid=0x1 runnable", ""));
        let hints = Analyzer::new(&dump).analyze_hints();
        assert!(hints.is_empty());
        assert_eq!(hints.to_string(), "");
    }

    #[test]
    fn test_stuck_carrier_hint() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        let carrier = thread(
            "\"ForkJoinPool-1-worker-1\" #22 daemon prio=5 tid=0x1 nid=0x2 runnable",
            "   Carrying virtual thread #21\n\tat com.example.Busy.spin(Busy.java:10)\nNote: This carrier thread seems to be stuck in application code\n",
        );
        dump.virtual_threads.add_record(carrier);

        let analyzer = Analyzer::new(&dump);
        let text = analyzer.analyze_hints().to_string();
        assert!(text.contains("Detected 1 virtual thread(s)"));
        assert!(text.contains(STUCK_CARRIER_PHRASE));
        assert_eq!(analyzer.stuck_carrier_threads(), vec!["ForkJoinPool-1-worker-1"]);
    }

    #[test]
    fn test_stuck_carrier_in_threads_category() {
        let header = "\"ForkJoinPool-1-worker-3\" #30 daemon prio=5 tid=0x3 nid=0x4 runnable";
        let extra = "\tat com.example.Busy.spin(Busy.java:10)\nNote: This carrier thread seems to be stuck in application code\n";
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        dump.threads.add_record(thread(header, extra));
        dump.threads
            .add_record(thread("\"main\" prio=5 tid=0x1 nid=0x1 runnable", ""));

        let analyzer = Analyzer::new(&dump);
        assert_eq!(analyzer.stuck_carrier_threads(), vec!["ForkJoinPool-1-worker-3"]);

        dump.virtual_threads.add_record(thread(header, extra));
        assert_eq!(analyzer.stuck_carrier_threads(), vec!["ForkJoinPool-1-worker-3"]);
        assert!(analyzer.analyze_hints().to_string().contains("Detected 1 virtual thread(s)"));
    }

    #[test]
    fn test_deadlock_hint() {
        let mut dump = ThreadDumpInfo::new("Dump No. 1", 1);
        dump.deadlock_count = 1;
        dump.deadlocks.add_record(thread("\"Thread-0\"", ""));
        dump.deadlocks.add_record(thread("\"Thread-1\"", ""));

        let hints = Analyzer::new(&dump).analyze_hints();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints.hints[0].kind, HintKind::Deadlock);
        assert!(hints.hints[0].message.contains("2 thread(s)"));
    }

    #[test]
    fn test_congestion_hint() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        let mut monitor = MonitorInfo::new("<0x1> (a java.lang.Object)");
        monitor.locking.push("owner".to_string());
        monitor.waiting = (0..6).map(|i| format!("worker-{i}")).collect();
        dump.monitors.add_record(monitor);

        let hints = Analyzer::new(&dump).analyze_hints();
        assert!(hints.iter().any(|h| h.kind == HintKind::Congestion));
        assert!(hints.to_html().contains("&lt;0x1&gt;"));
    }

    #[test]
    fn test_many_waiting_hint() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        for i in 0..3 {
            let blocked = thread(
                &format!("\"worker-{i}\" prio=5 tid=0x{i} nid=0x{i} waiting for monitor entry"),
                "",
            );
            let record = crate::category::Record::from(blocked);
            dump.threads.add_record(record.clone());
            dump.waiting_threads.add_record(record);
        }
        dump.threads
            .add_record(thread("\"main\" prio=5 tid=0x9 nid=0x9 runnable", ""));

        let hints = Analyzer::new(&dump).analyze_hints();
        assert!(hints.iter().any(|h| h.kind == HintKind::ManyWaiting));
    }
}
