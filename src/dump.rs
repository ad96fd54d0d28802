//! One parsed thread dump and its categories.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::analyzer::Analyzer;
use crate::category::Category;
use crate::smr;
use crate::thread::ThreadState;

static HEAP_GENERATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S[^,]*?)\s+total\s+(\d+)K,\s+used\s+(\d+)K").unwrap());

static HISTOGRAM_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+):\s+(\d+)\s+(\d+)\s+(.+?)\s*$").unwrap());

static HISTOGRAM_TOTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Total\s+(\d+)\s+(\d+)").unwrap());

/// More than this many waiting threads on one monitor is reported as congestion.
pub const CONGESTION_THRESHOLD: usize = 5;

/// Category names, as shown in result trees and summaries.
pub mod names {
    pub const THREADS: &str = "Threads";
    pub const VIRTUAL_THREADS: &str = "Virtual Threads";
    pub const DEADLOCKS: &str = "Deadlocks";
    pub const MONITORS: &str = "Monitors";
    pub const MONITORS_WITHOUT_LOCKS: &str = "Monitors without locking thread";
    pub const WAITING: &str = "Threads waiting for Monitors";
    pub const SLEEPING: &str = "Threads sleeping on Monitors";
    pub const LOCKING: &str = "Threads locking Monitors";
    pub const BLOCKING_MONITORS: &str = "Blocking Monitors";
}

/// Heap summary printed after the threads by Sun JDK 6 jstack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeapInfo {
    pub lines: Vec<String>,
}

/// One `PSYoungGen total 153600K, used 52244K` style line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapGeneration {
    pub name: String,
    pub total_kb: u64,
    pub used_kb: u64,
}

impl HeapInfo {
    pub fn generations(&self) -> Vec<HeapGeneration> {
        self.lines
            .iter()
            .filter_map(|line| {
                let caps = HEAP_GENERATION.captures(line)?;
                Some(HeapGeneration {
                    name: caps[1].to_string(),
                    total_kb: caps[2].parse().ok()?,
                    used_kb: caps[3].parse().ok()?,
                })
            })
            .collect()
    }

    pub fn to_html(&self) -> String {
        let mut html = String::from("<table>");
        for generation in self.generations() {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}K used of {}K</td></tr>",
                escape_html(&generation.name),
                generation.used_kb,
                generation.total_kb
            );
        }
        html.push_str("</table><pre>");
        for line in &self.lines {
            html.push_str(&escape_html(line));
            html.push('\n');
        }
        html.push_str("</pre>");
        html
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramEntry {
    pub rank: u32,
    pub instances: u64,
    pub bytes: u64,
    pub class_name: String,
}

/// Class histogram (`-XX:+PrintClassHistogram`) embedded in a dump.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramInfo {
    pub entries: Vec<HistogramEntry>,
    pub total_instances: u64,
    pub total_bytes: u64,
}

impl HistogramInfo {
    /// Feed one line of the histogram section. Returns `false` once the
    /// `Total` line has been consumed.
    pub fn push_line(&mut self, line: &str) -> bool {
        if let Some(caps) = HISTOGRAM_TOTAL.captures(line) {
            self.total_instances = caps[1].parse().unwrap_or_default();
            self.total_bytes = caps[2].parse().unwrap_or_default();
            return false;
        }
        if let Some(caps) = HISTOGRAM_ROW.captures(line) {
            self.entries.push(HistogramEntry {
                rank: caps[1].parse().unwrap_or_default(),
                instances: caps[2].parse().unwrap_or_default(),
                bytes: caps[3].parse().unwrap_or_default(),
                class_name: caps[4].to_string(),
            });
        } else if !line.trim().is_empty() && !line.trim_start().starts_with("---") {
            log::debug!("skipping histogram line: {line}");
        }
        true
    }
}

/// One thread dump snapshot.
#[derive(Debug)]
pub struct ThreadDumpInfo {
    pub name: String,
    pub start_time: Option<String>,
    /// 1-based line of the dump header, 0 if unknown
    pub log_line: usize,
    /// Raw `Threads class SMR info:` block
    pub smr_info: Option<String>,
    pub unresolved_smr_addresses: Vec<String>,
    pub heap_info: Option<HeapInfo>,
    pub histogram: Option<HistogramInfo>,
    /// Number of deadlock cycles reported by the JVM
    pub deadlock_count: usize,
    /// Threads blocked on monitors that have no locking thread
    pub overall_threads_waiting_without_locks: usize,

    pub threads: Category,
    pub virtual_threads: Category,
    pub deadlocks: Category,
    pub monitors: Category,
    pub monitors_without_locks: Category,
    pub waiting_threads: Category,
    pub sleeping_threads: Category,
    pub locking_threads: Category,
    pub blocking_monitors: Category,

    overview: OnceCell<String>,
}

impl ThreadDumpInfo {
    pub fn new(name: impl Into<String>, log_line: usize) -> Self {
        Self {
            name: name.into(),
            start_time: None,
            log_line,
            smr_info: None,
            unresolved_smr_addresses: Vec::new(),
            heap_info: None,
            histogram: None,
            deadlock_count: 0,
            overall_threads_waiting_without_locks: 0,
            threads: Category::new(names::THREADS),
            virtual_threads: Category::new(names::VIRTUAL_THREADS),
            deadlocks: Category::new(names::DEADLOCKS),
            monitors: Category::new(names::MONITORS),
            monitors_without_locks: Category::new(names::MONITORS_WITHOUT_LOCKS),
            waiting_threads: Category::new(names::WAITING),
            sleeping_threads: Category::new(names::SLEEPING),
            locking_threads: Category::new(names::LOCKING),
            blocking_monitors: Category::new(names::BLOCKING_MONITORS),
            overview: OnceCell::new(),
        }
    }

    /// All categories in display order.
    pub fn categories(&self) -> [&Category; 9] {
        [
            &self.threads,
            &self.virtual_threads,
            &self.deadlocks,
            &self.monitors,
            &self.monitors_without_locks,
            &self.waiting_threads,
            &self.sleeping_threads,
            &self.locking_threads,
            &self.blocking_monitors,
        ]
    }

    pub fn state_distribution(&self) -> BTreeMap<&'static str, usize> {
        let mut distribution = BTreeMap::new();
        for thread in self.threads.threads() {
            *distribution.entry(thread.state.as_str()).or_insert(0) += 1;
        }
        distribution
    }

    /// HTML overview. Computed on first access and memoized.
    pub fn overview(&self) -> &str {
        self.overview.get_or_init(|| self.render_overview())
    }

    fn render_overview(&self) -> String {
        let mut html = String::from(
            "<html><body style=\"font-family: sans-serif; margin: 20px;\"><h2>Thread Dump Overview</h2>",
        );

        let threads_count = self.threads.len();
        if threads_count > 0 {
            let distribution = self.state_distribution();
            let _ = write!(
                html,
                "<h4>Thread State Distribution ({threads_count} threads)</h4><table width=\"100%\"><tr>"
            );
            for (state, color) in ThreadState::ALL.iter().zip(STATE_COLORS) {
                let count = distribution.get(state.as_str()).copied().unwrap_or(0);
                if count > 0 {
                    let percent = count as f64 * 100.0 / threads_count as f64;
                    let _ = write!(
                        html,
                        "<td width=\"{percent:.1}%\" bgcolor=\"{color}\" title=\"{state}: {count}\">{state} ({count})</td>"
                    );
                }
            }
            html.push_str("</tr></table>");
        }

        html.push_str("<table width=\"100%\">");
        let _ = write!(
            html,
            "<tr><td><b>Overall Monitor Count:</b> {}</td><td><b>Deadlocks:</b> {}</td></tr>",
            self.monitors.len(),
            self.deadlock_count
        );
        if let Some(smr_info) = &self.smr_info {
            let _ = write!(
                html,
                "<tr><td colspan=\"2\"><pre>{}</pre></td></tr>",
                escape_html(smr_info)
            );
        }
        let _ = write!(
            html,
            "<tr><td><b>Threads locking:</b> {}</td><td><b>Monitors without locking:</b> {}</td></tr>",
            self.locking_threads.len(),
            self.monitors_without_locks.len()
        );
        let _ = write!(
            html,
            "<tr><td><b>Threads waiting:</b> {}</td><td><b>Threads sleeping:</b> {}</td></tr>",
            self.waiting_threads.len(),
            self.sleeping_threads.len()
        );
        html.push_str("</table>");

        if self.smr_info.is_some() {
            html.push_str(&self.render_smr_table());
        }

        let hints = Analyzer::new(self).analyze_hints();
        if !hints.is_empty() {
            html.push_str("<div><h4>Analysis Hints</h4><table border=\"0\" width=\"100%\">");
            html.push_str(&hints.to_html());
            html.push_str("</table></div>");
        }

        if let Some(heap) = &self.heap_info {
            html.push_str("<div><h4>Heap Information</h4>");
            html.push_str(&heap.to_html());
            html.push_str("</div>");
        }

        html.push_str("</body></html>");
        html
    }

    fn render_smr_table(&self) -> String {
        let entries = smr::resolve(self);
        let mut html = String::from(
            "<h4>SMR Thread Resolution</h4><table width=\"100%\"><tr><th>Address</th><th>Resolved Thread</th></tr>",
        );
        for entry in &entries {
            match &entry.thread {
                Some(thread) => {
                    let _ = write!(
                        html,
                        "<tr><td>{}</td><td>{}</td></tr>",
                        entry.address,
                        escape_html(thread)
                    );
                }
                None => {
                    let _ = write!(
                        html,
                        "<tr><td>{}</td><td style=\"color: #dc3545;\"><b>NOT FOUND</b></td></tr>",
                        entry.address
                    );
                }
            }
        }
        html.push_str("</table>");
        if entries.iter().any(|entry| entry.thread.is_none()) {
            html.push_str(
                "<p style=\"color: #dc3545;\">Some SMR addresses could not be resolved to threads. \
                 These may be zombie threads that exited without being removed from the thread list.</p>",
            );
        }
        html
    }
}

const STATE_COLORS: [&str; 6] = ["#28a745", "#ffc107", "#fd7e14", "#dc3545", "#6f42c1", "#6c757d"];

impl fmt::Display for ThreadDumpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.log_line > 0 {
            write!(f, " at line {}", self.log_line)?;
        }
        if let Some(start_time) = &self.start_time {
            write!(f, " around {start_time}")?;
        }
        Ok(())
    }
}

/// HTML summary for a single monitor.
pub fn monitor_info(locks: usize, waits: usize, sleeps: usize) -> String {
    let mut html = String::from("<html><body><table width=\"100%\">");
    for (label, value) in [
        ("Threads locking monitor", locks),
        ("Threads sleeping on monitor", sleeps),
        ("Threads waiting to lock monitor", waits),
    ] {
        let _ = write!(html, "<tr><td>{label}</td><td align=\"right\"><b>{value}</b></td></tr>");
    }
    html.push_str("</table>");

    if locks == 0 {
        html.push_str(
            "<p><b>No locking thread detected.</b> Possible reasons:</p>\
             <ul><li>A VM Thread is holding it.</li>\
             <li>It is a <tt>java.util.concurrent</tt> lock and -XX:+PrintConcurrentLocks is missing.</li>\
             <li>It is a custom lock not based on <tt>AbstractOwnableSynchronizer</tt>.</li></ul>\
             <p>If many monitors have no locking thread, the garbage collector might be running.</p>",
        );
    }
    if are_a_lot_of_waiting(waits) {
        html.push_str(
            "<p><b>High congestion!</b> A lot of threads are waiting for this monitor.</p>\
             <p>Analyze other blocked locks as well, as there might be a chain of waiting threads.</p>",
        );
    }
    html.push_str("</body></html>");
    html
}

pub fn are_a_lot_of_waiting(waits: usize) -> bool {
    waits > CONGESTION_THRESHOLD
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadInfo;
    use crate::tokens::sun_thread_tokens;

    fn add_thread(dump: &ThreadDumpInfo, header: &str) {
        let thread = ThreadInfo::new(
            header.to_string(),
            format!("{header}\n"),
            1,
            sun_thread_tokens(header),
        );
        dump.threads.add_record(thread);
    }

    #[test]
    fn test_display() {
        let mut dump = ThreadDumpInfo::new("Dump No. 1", 3);
        assert_eq!(dump.to_string(), "Dump No. 1 at line 3");
        dump.start_time = Some("2024-01-31 12:00:00".to_string());
        assert_eq!(dump.to_string(), "Dump No. 1 at line 3 around 2024-01-31 12:00:00");
        assert_eq!(ThreadDumpInfo::new("Dump No. 2", 0).to_string(), "Dump No. 2");
    }

    #[test]
    fn test_new_dump_categories_are_empty() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        assert!(dump.categories().iter().all(|c| c.is_empty()));
        assert_eq!(dump.virtual_threads.name(), names::VIRTUAL_THREADS);
    }

    #[test]
    fn test_overview_is_memoized() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        add_thread(&dump, "\"main\" prio=5 tid=0x1 nid=0x2 runnable");
        let first = dump.overview().as_ptr();

        add_thread(&dump, "\"late\" prio=5 tid=0x3 nid=0x4 runnable");
        assert_eq!(dump.overview().as_ptr(), first);
        assert!(dump.overview().contains("(1 threads)"));
    }

    #[test]
    fn test_overview_state_distribution_and_counts() {
        let dump = ThreadDumpInfo::new("Dump No. 1", 1);
        add_thread(&dump, "\"main\" prio=5 tid=0x1 nid=0x2 runnable");
        add_thread(&dump, "\"blocked\" prio=5 tid=0x3 nid=0x4 waiting for monitor entry");
        let overview = dump.overview();

        assert!(overview.contains("RUNNABLE (1)"));
        assert!(overview.contains("BLOCKED (1)"));
        assert!(overview.contains("<b>Overall Monitor Count:</b> 0"));
        assert!(!overview.contains("SMR Thread Resolution"));
    }

    #[test]
    fn test_overview_lists_unresolved_smr_addresses() {
        let mut dump = ThreadDumpInfo::new("Dump No. 1", 1);
        dump.smr_info = Some(
            "_java_thread_list=0x000000087e826560, length=2, elements={\n0x000000010328e320, 0x00000001deadbeef\n}".to_string(),
        );
        add_thread(&dump, "\"Reference Handler\" #9 daemon prio=10 tid=0x000000010328e320 nid=30467 waiting on condition");
        let overview = dump.overview();

        assert!(overview.contains("Address</th>"));
        assert!(overview.contains("Resolved Thread</th>"));
        assert!(overview.contains("Reference Handler"));
        assert!(overview.contains("NOT FOUND"));
        assert!(overview.contains("Some SMR addresses could not be resolved to threads"));
    }

    #[test]
    fn test_monitor_info() {
        let quiet = monitor_info(1, 0, 0);
        assert!(quiet.contains("Threads locking monitor"));
        assert!(!quiet.contains("No locking thread detected"));
        assert!(!quiet.contains("High congestion"));

        let orphan = monitor_info(0, 6, 0);
        assert!(orphan.contains("No locking thread detected"));
        assert!(orphan.contains("High congestion"));
    }

    #[test]
    fn test_congestion_threshold() {
        assert!(!are_a_lot_of_waiting(5));
        assert!(are_a_lot_of_waiting(6));
    }

    #[test]
    fn test_heap_generations() {
        let heap = HeapInfo {
            lines: vec![
                "Heap".to_string(),
                " PSYoungGen      total 153600K, used 52244K [0x00000007f5560000, 0x0000000800000000)".to_string(),
                "  eden space 131584K, 39% used [0x00000007f5560000,0x00000007f8885098,0x00000007fd600000)".to_string(),
                " PSPermGen       total 21248K, used 2742K [0x00000007e7c00000, 0x00000007e90c0000)".to_string(),
            ],
        };
        let generations = heap.generations();
        assert_eq!(generations.len(), 2);
        assert_eq!(generations[0].name, "PSYoungGen");
        assert_eq!(generations[0].used_kb, 52244);
        assert!(heap.to_html().contains("PSPermGen"));
    }

    #[test]
    fn test_histogram_lines() {
        let mut histogram = HistogramInfo::default();
        assert!(histogram.push_line("----------------------------------------------"));
        assert!(histogram.push_line("   1:         11062        1043944  [C"));
        assert!(histogram.push_line("   2:          1523         219312  java.lang.Class (java.base@11.0.2)"));
        assert!(!histogram.push_line("Total         31876        2519856"));

        assert_eq!(histogram.entries.len(), 2);
        assert_eq!(histogram.entries[1].class_name, "java.lang.Class (java.base@11.0.2)");
        assert_eq!(histogram.total_bytes, 2519856);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<0x1> & \"a\""), "&lt;0x1&gt; &amp; &quot;a&quot;");
    }
}
