//! Assembles a [`ThreadDumpInfo`] from parsed threads.
//!
//! Vendor parsers only recognise records; filing them into categories and
//! deriving the monitor view is shared here.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::category::Record;
use crate::dump::{HeapInfo, HistogramInfo, ThreadDumpInfo};
use crate::parser::deadlock::DeadlockReport;
use crate::smr;
use crate::thread::{MonitorInfo, MonitorRelation, ThreadInfo, ThreadState};
use crate::thread_store::{ThreadRow, ThreadStore};
use crate::tokens::ThreadTokens;

/// Where a thread is filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Platform thread
    Platform,
    /// Platform thread that carries a virtual thread; filed in both categories
    Carrier,
    /// Virtual thread (JSON dumps only)
    Virtual,
}

pub struct DumpBuilder {
    dump: ThreadDumpInfo,
    by_name: HashMap<String, Rc<ThreadInfo>>,
    monitor_order: Vec<String>,
    monitors: HashMap<String, MonitorInfo>,
}

impl DumpBuilder {
    pub fn new(name: impl Into<String>, log_line: usize) -> Self {
        Self {
            dump: ThreadDumpInfo::new(name, log_line),
            by_name: HashMap::new(),
            monitor_order: Vec::new(),
            monitors: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.dump.name
    }

    pub fn thread_count(&self) -> usize {
        self.dump.threads.len() + self.dump.virtual_threads.len()
    }

    pub fn set_start_time(&mut self, start_time: Option<String>) {
        self.dump.start_time = start_time;
    }

    pub fn set_smr_info(&mut self, smr_info: String) {
        self.dump.smr_info = Some(smr_info);
    }

    pub fn set_heap_info(&mut self, heap: HeapInfo) {
        self.dump.heap_info = Some(heap);
    }

    pub fn set_histogram(&mut self, histogram: HistogramInfo) {
        self.dump.histogram = Some(histogram);
    }

    /// File a thread into the dump's categories and record its row in `store`.
    pub fn add_thread(&mut self, thread: ThreadInfo, placement: Placement, store: &mut ThreadStore) {
        store.insert(&self.dump.name, ThreadRow::from(&thread));
        let name = thread.name().to_string();

        let mut holds = false;
        let mut waits = false;
        let mut sleeps = false;
        let lines: Vec<_> = thread.monitor_lines().collect();
        let sleeping_on: HashSet<&str> = lines
            .iter()
            .filter(|line| line.relation == MonitorRelation::Sleeping)
            .map(|line| line.address.as_str())
            .collect();

        for line in &lines {
            // Object.wait() prints both "waiting on" and "locked" for the same monitor.
            if line.relation == MonitorRelation::Locked && sleeping_on.contains(line.address.as_str()) {
                continue;
            }
            let monitor = self.monitor_entry(line.title());
            match line.relation {
                MonitorRelation::Locked => {
                    monitor.locking.push(name.clone());
                    holds = true;
                }
                MonitorRelation::WaitingToLock => {
                    monitor.waiting.push(name.clone());
                    waits = true;
                }
                MonitorRelation::Sleeping => {
                    monitor.sleeping.push(name.clone());
                    sleeps = true;
                }
            }
        }

        let state = thread.state;
        let record = Record::Thread(Rc::new(thread));
        if let Record::Thread(info) = &record {
            self.by_name.entry(name).or_insert_with(|| Rc::clone(info));
        }

        match placement {
            Placement::Platform => {
                self.dump.threads.add_record(record.clone());
            }
            Placement::Carrier => {
                self.dump.threads.add_record(record.clone());
                self.dump.virtual_threads.add_record(record.clone());
            }
            Placement::Virtual => {
                self.dump.virtual_threads.add_record(record.clone());
            }
        }
        if waits || state == ThreadState::Blocked {
            self.dump.waiting_threads.add_record(record.clone());
        }
        if sleeps || state.is_idle() {
            self.dump.sleeping_threads.add_record(record.clone());
        }
        if holds {
            self.dump.locking_threads.add_record(record);
        }
    }

    fn monitor_entry(&mut self, title: String) -> &mut MonitorInfo {
        if !self.monitors.contains_key(&title) {
            self.monitor_order.push(title.clone());
        }
        self.monitors
            .entry(title.clone())
            .or_insert_with(|| MonitorInfo::new(title))
    }

    /// Fill the deadlocks category. Threads are looked up by name; a thread
    /// only known from the report gets a record built from its report stack.
    pub fn set_deadlocks(&mut self, report: DeadlockReport) {
        if report.is_empty() {
            return;
        }
        self.dump.deadlocks.set_name(report.category_name());
        self.dump.deadlock_count = report.cycles.len();
        for name in report.thread_names() {
            let record = match self.by_name.get(name) {
                Some(thread) => Record::Thread(Rc::clone(thread)),
                None => {
                    log::debug!("deadlocked thread '{name}' not found among parsed threads");
                    let content = report
                        .stack_of(name)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("\"{name}\":\n"));
                    let tokens = ThreadTokens {
                        name: name.to_string(),
                        ..Default::default()
                    };
                    Record::from(ThreadInfo::new(format!("\"{name}\""), content, 0, tokens))
                }
            };
            self.dump.deadlocks.add_record(record);
        }
    }

    /// Derive monitor categories, resolve SMR addresses and hand out the dump.
    pub fn finish(mut self) -> ThreadDumpInfo {
        for title in std::mem::take(&mut self.monitor_order) {
            let Some(monitor) = self.monitors.remove(&title) else {
                continue;
            };
            let locks = monitor.locks();
            let waits = monitor.waits();
            let record = Record::from(monitor);
            self.dump.monitors.add_record(record.clone());
            if locks == 0 {
                self.dump.overall_threads_waiting_without_locks += waits;
                self.dump.monitors_without_locks.add_record(record.clone());
            }
            if locks > 0 && waits > 0 {
                self.dump.blocking_monitors.add_record(record);
            }
        }

        self.dump.unresolved_smr_addresses = smr::resolve_smr_addresses(&self.dump);
        if !self.dump.unresolved_smr_addresses.is_empty() {
            log::warn!(
                "{}: {} SMR address(es) could not be resolved to threads",
                self.dump.name,
                self.dump.unresolved_smr_addresses.len()
            );
        }
        log::info!(
            "parsed {} with {} threads, {} virtual, {} monitors",
            self.dump.name,
            self.dump.threads.len(),
            self.dump.virtual_threads.len(),
            self.dump.monitors.len()
        );
        self.dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::sun_thread_tokens;

    fn thread(header: &str, body: &str) -> ThreadInfo {
        ThreadInfo::new(
            header.to_string(),
            format!("{header}\n{body}"),
            1,
            sun_thread_tokens(header),
        )
    }

    #[test]
    fn test_monitor_categories() {
        let mut store = ThreadStore::new();
        let mut builder = DumpBuilder::new("Dump No. 1", 1);
        builder.add_thread(
            thread(
                "\"owner\" prio=5 tid=0x1 nid=0x1 runnable",
                "   java.lang.Thread.State: RUNNABLE\n\t- locked <0x10> (a java.lang.Object)\n",
            ),
            Placement::Platform,
            &mut store,
        );
        builder.add_thread(
            thread(
                "\"blocked\" prio=5 tid=0x2 nid=0x2 waiting for monitor entry",
                "   java.lang.Thread.State: BLOCKED (on object monitor)\n\t- waiting to lock <0x10> (a java.lang.Object)\n",
            ),
            Placement::Platform,
            &mut store,
        );
        builder.add_thread(
            thread(
                "\"parked\" prio=5 tid=0x3 nid=0x3 waiting on condition",
                "   java.lang.Thread.State: WAITING (parking)\n\t- parking to wait for  <0x20> (a java.util.concurrent.locks.ReentrantLock$NonfairSync)\n",
            ),
            Placement::Platform,
            &mut store,
        );
        let dump = builder.finish();

        assert_eq!(dump.threads.len(), 3);
        assert_eq!(dump.monitors.len(), 2);
        assert_eq!(dump.blocking_monitors.len(), 1);
        assert_eq!(dump.monitors_without_locks.len(), 1);
        assert_eq!(dump.waiting_threads.len(), 1);
        assert_eq!(dump.sleeping_threads.len(), 1);
        assert_eq!(dump.locking_threads.len(), 1);
        assert_eq!(dump.overall_threads_waiting_without_locks, 0);
        assert_eq!(store.thread_names("Dump No. 1").len(), 3);
    }

    #[test]
    fn test_object_wait_is_not_locking() {
        let mut store = ThreadStore::new();
        let mut builder = DumpBuilder::new("Dump No. 1", 1);
        builder.add_thread(
            thread(
                "\"Finalizer\" daemon prio=10 tid=0x1 nid=0x1 in Object.wait()",
                "\tat java.lang.Object.wait(Native Method)\n\t- waiting on <0x30> (a java.lang.ref.ReferenceQueue$Lock)\n\t- locked <0x30> (a java.lang.ref.ReferenceQueue$Lock)\n",
            ),
            Placement::Platform,
            &mut store,
        );
        let dump = builder.finish();

        assert!(dump.locking_threads.is_empty());
        assert_eq!(dump.sleeping_threads.len(), 1);
        let monitor = &dump.monitors.monitors()[0];
        assert_eq!((monitor.locks(), monitor.sleeps()), (0, 1));
    }

    #[test]
    fn test_carrier_goes_into_both_categories() {
        let mut store = ThreadStore::new();
        let mut builder = DumpBuilder::new("Dump No. 1", 1);
        builder.add_thread(
            thread("\"ForkJoinPool-1-worker-1\" #22 daemon prio=5 tid=0x1 nid=0x1 runnable", "   Carrying virtual thread #21\n"),
            Placement::Carrier,
            &mut store,
        );
        let dump = builder.finish();

        assert_eq!(dump.threads.len(), 1);
        assert_eq!(dump.virtual_threads.len(), 1);
        assert!(Rc::ptr_eq(&dump.threads.threads()[0], &dump.virtual_threads.threads()[0]));
    }

    #[test]
    fn test_deadlocks_reuse_parsed_threads() {
        let mut store = ThreadStore::new();
        let mut builder = DumpBuilder::new("Dump No. 1", 1);
        builder.add_thread(thread("\"Thread-0\" prio=5 tid=0x1 nid=0x1 waiting for monitor entry", ""), Placement::Platform, &mut store);
        let report = DeadlockReport {
            cycles: vec![vec!["Thread-1".to_string(), "Thread-0".to_string()]],
            stacks: vec![("Thread-1".to_string(), "\"Thread-1\":\n\tat Deadlock$2.run(Deadlock.java:30)\n".to_string())],
        };
        builder.set_deadlocks(report);
        let dump = builder.finish();

        assert_eq!(dump.deadlock_count, 1);
        assert_eq!(dump.deadlocks.len(), 2);
        assert!(dump.deadlocks.name().contains("Thread-1 -> Thread-0 -> Thread-1"));
        assert!(Rc::ptr_eq(&dump.deadlocks.threads()[1], &dump.threads.threads()[0]));
        assert!(dump.deadlocks.threads()[0].content.contains("Deadlock$2.run"));
    }

    #[test]
    fn test_smr_resolved_on_finish() {
        let mut store = ThreadStore::new();
        let mut builder = DumpBuilder::new("Dump No. 1", 1);
        builder.set_smr_info("_java_thread_list=0x1, length=2, elements={\n0x0000000000000aa0, 0x0000000000000bb0\n}".to_string());
        builder.add_thread(thread("\"main\" prio=5 tid=0x0000000000000aa0 nid=0x1 runnable", ""), Placement::Platform, &mut store);
        let dump = builder.finish();

        assert_eq!(dump.unresolved_smr_addresses, vec!["0x0000000000000bb0"]);
    }
}
