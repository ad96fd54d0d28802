//! Headless analysis session.
//!
//! A session accumulates dumps from one or more log files together with the
//! thread store the long-running matcher needs, and answers the diagnostic
//! questions a front end asks about them. Results are plain messages or
//! serializable records so a CLI or service layer can print them directly.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;

use crate::analyzer::{Analyzer, Hints};
use crate::category::ResultNode;
use crate::config::Config;
use crate::dump::ThreadDumpInfo;
use crate::error::{Result, TdaError};
use crate::frames::first_native_frame;
use crate::long_running::{self, LongRunning, LongRunningOptions};
use crate::parser::{select_parser, DumpParser, ParserKind, ParserOptions};
use crate::thread::ThreadInfo;
use crate::thread_store::ThreadStore;

/// One line of [`Session::dumps_summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpSummary {
    pub index: usize,
    pub name: String,
    pub time: Option<String>,
    pub thread_count: usize,
    pub virtual_thread_count: usize,
    pub deadlock_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smr_info: Option<String>,
}

/// A thread currently inside a native method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeThread {
    pub name: String,
    pub tid: Option<u64>,
    pub state: String,
    /// Text of the first `Native Method` frame
    pub native_method: String,
}

/// An SMR address that matched no thread of its dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZombieThread {
    pub address: String,
    pub dump_name: String,
    pub timestamp: String,
}

#[derive(Debug, Default)]
pub struct Session {
    options: ParserOptions,
    long_running: LongRunningOptions,
    store: ThreadStore,
    dumps: Vec<ThreadDumpInfo>,
    found_class_histograms: bool,
    current_log_file: Option<PathBuf>,
}

impl Session {
    pub fn new(options: ParserOptions, long_running: LongRunningOptions) -> Self {
        Self {
            options,
            long_running,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ParserOptions::from_config(&config.parser)?,
            LongRunningOptions::from_config(&config.long_running)?,
        ))
    }

    /// Parse every dump in `path` and append them to the session.
    pub fn parse_log_file(&mut self, path: impl AsRef<Path>) -> Result<(ParserKind, usize)> {
        let path = path.as_ref();
        log::info!("parsing log file {}", path.display());
        self.current_log_file = Some(path.to_path_buf());
        if !path.exists() {
            return Err(TdaError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file))
    }

    /// Parse every dump of `reader` and append them to the session.
    ///
    /// Dump numbering continues after the dumps already held, so names stay
    /// unique across files. Dumps parsed before a failure are kept.
    pub fn parse_reader<R: Read>(&mut self, reader: R) -> Result<(ParserKind, usize)> {
        let mut options = self.options.clone();
        options.dump_counter_start += self.dumps.len();

        let mut parser = select_parser(reader, ThreadStore::new(), options)?;
        let kind = parser.kind();
        let mut parsed = 0;
        let outcome = loop {
            if !parser.has_more_dumps() {
                break Ok(());
            }
            match parser.parse_next() {
                Ok(Some(dump)) => {
                    self.dumps.push(dump);
                    parsed += 1;
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.found_class_histograms |= parser.is_found_class_histograms();
        parser.close();
        self.store.merge(parser.into_thread_store());
        log::info!("{kind} parser produced {parsed} dump(s)");
        outcome.map(|()| (kind, parsed))
    }

    pub fn dumps(&self) -> &[ThreadDumpInfo] {
        &self.dumps
    }

    pub fn dump(&self, index: usize) -> Result<&ThreadDumpInfo> {
        self.dumps.get(index).ok_or(TdaError::IndexOutOfRange {
            index,
            available: self.dumps.len(),
        })
    }

    pub fn thread_store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn current_log_file(&self) -> Option<&Path> {
        self.current_log_file.as_deref()
    }

    pub fn is_found_class_histograms(&self) -> bool {
        self.found_class_histograms
    }

    pub fn dumps_summary(&self) -> Vec<DumpSummary> {
        self.dumps
            .iter()
            .enumerate()
            .map(|(index, dump)| DumpSummary {
                index,
                name: dump.name.clone(),
                time: dump.start_time.clone(),
                thread_count: dump.threads.len(),
                virtual_thread_count: dump.virtual_threads.len(),
                deadlock_count: dump.deadlock_count,
                smr_info: dump.smr_info.clone(),
            })
            .collect()
    }

    pub fn check_for_deadlocks(&self) -> Vec<String> {
        let found: Vec<String> = self
            .dumps
            .iter()
            .filter(|dump| !dump.deadlocks.is_empty())
            .map(|dump| format!("Deadlock found in dump '{}': {}", dump.name, dump.deadlocks.name()))
            .collect();
        if found.is_empty() {
            return vec![format!("No deadlocks found in {} dumps.", self.dumps.len())];
        }
        found
    }

    /// Long-running threads across all dumps of the session, as a tree.
    pub fn long_running_tree(&self) -> (ResultNode, LongRunning) {
        let names: Vec<String> = self.dumps.iter().map(|dump| dump.name.clone()).collect();
        let mut root = ResultNode::new("Long running threads");
        let outcome = long_running::find_long_running_threads(&mut root, &self.store, &names, &self.long_running);
        (root, outcome)
    }

    pub fn find_long_running_threads(&self) -> Vec<String> {
        let (root, outcome) = self.long_running_tree();
        match outcome {
            LongRunning::NotEnoughDumps => {
                vec!["At least two dumps are required to find long running threads.".to_string()]
            }
            LongRunning::Matched(0) => {
                vec![format!("No long running threads found across {} dumps.", self.dumps.len())]
            }
            LongRunning::Matched(_) => root
                .children
                .iter()
                .map(|child| format!("Long running thread: {}", child.label))
                .collect(),
        }
    }

    pub fn analyze_virtual_threads(&self) -> Vec<String> {
        let mut results = Vec::new();
        for dump in &self.dumps {
            for thread in Analyzer::new(dump).stuck_carrier_threads() {
                results.push(format!("Stuck carrier thread in dump '{}': {thread}", dump.name));
            }
        }
        if results.is_empty() {
            results.push(format!(
                "No virtual threads with stuck carrier threads detected in {} dumps.",
                self.dumps.len()
            ));
        }
        results
    }

    /// Threads of dump `index` sitting in a native method. Carriers listed
    /// in both thread categories are reported once.
    pub fn native_threads(&self, index: usize) -> Result<Vec<NativeThread>> {
        let dump = self.dump(index)?;
        let mut seen: Vec<Rc<ThreadInfo>> = Vec::new();
        let mut natives = Vec::new();
        for thread in dump.threads.threads().into_iter().chain(dump.virtual_threads.threads()) {
            if seen.iter().any(|other| Rc::ptr_eq(other, &thread)) {
                continue;
            }
            if let Some(native_method) = first_native_frame(&thread.content) {
                natives.push(NativeThread {
                    name: thread.name().to_string(),
                    tid: thread.tokens.tid,
                    state: thread.state.to_string(),
                    native_method,
                });
            }
            seen.push(thread);
        }
        Ok(natives)
    }

    pub fn zombie_threads(&self) -> Vec<ZombieThread> {
        self.dumps
            .iter()
            .flat_map(|dump| {
                dump.unresolved_smr_addresses.iter().map(|address| ZombieThread {
                    address: address.clone(),
                    dump_name: dump.name.clone(),
                    timestamp: dump.start_time.clone().unwrap_or_else(|| "unknown".to_string()),
                })
            })
            .collect()
    }

    pub fn hints(&self, index: usize) -> Result<Hints> {
        Ok(Analyzer::new(self.dump(index)?).analyze_hints())
    }

    /// Forget every dump and stored thread row.
    pub fn clear(&mut self) {
        self.dumps.clear();
        self.store.clear();
        self.found_class_histograms = false;
        self.current_log_file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(input: &[u8]) -> Session {
        let mut session = Session::default();
        session.parse_reader(input).unwrap();
        session
    }

    #[test]
    fn test_summary_of_three_dumps() {
        let session = session_with(include_bytes!("../testdata/test.log"));
        let summary = session.dumps_summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].index, 0);
        assert_eq!(summary[0].name, "Dump No. 1");
        assert_eq!(summary[2].name, "Dump No. 3");
        assert_eq!(summary[0].time.as_deref(), Some("2010-07-05 11:22:33"));
        assert!(summary.iter().all(|dump| dump.thread_count > 0));
    }

    #[test]
    fn test_missing_file() {
        let mut session = Session::default();
        let err = session.parse_log_file("/nonexistent/threads.log").unwrap_err();
        assert!(matches!(err, TdaError::FileNotFound(_)));
        assert_eq!(session.current_log_file(), Some(Path::new("/nonexistent/threads.log")));
    }

    #[test]
    fn test_unrecognized_input_keeps_session_usable() {
        let mut session = session_with(include_bytes!("../testdata/java8dump.log"));
        assert!(matches!(session.parse_reader(&b""[..]), Err(TdaError::FormatUnrecognized)));
        assert_eq!(session.dumps().len(), 1);
    }

    #[test]
    fn test_deadlocks() {
        let session = session_with(include_bytes!("../testdata/deadlock.log"));
        let messages = session.check_for_deadlocks();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Deadlock found in dump 'Dump No. 1': "));

        let clean = session_with(include_bytes!("../testdata/test.log"));
        assert_eq!(clean.check_for_deadlocks(), vec!["No deadlocks found in 3 dumps."]);
    }

    #[test]
    fn test_long_running_messages() {
        let single = session_with(include_bytes!("../testdata/java8dump.log"));
        assert_eq!(
            single.find_long_running_threads(),
            vec!["At least two dumps are required to find long running threads."]
        );

        let session = session_with(include_bytes!("../testdata/jdk11_long_running.log"));
        let messages = session.find_long_running_threads();
        assert!(messages.contains(&"Long running thread: C2 CompilerThread0 (RUNNABLE -> RUNNABLE)".to_string()));
        assert!(messages.iter().all(|m| m.starts_with("Long running thread: ")));
    }

    #[test]
    fn test_stuck_carriers() {
        let session = session_with(include_bytes!("../testdata/carrier_stuck.log"));
        assert_eq!(
            session.analyze_virtual_threads(),
            vec!["Stuck carrier thread in dump 'Dump No. 1': ForkJoinPool-1-worker-1"]
        );

        let clean = session_with(include_bytes!("../testdata/java8dump.log"));
        assert_eq!(
            clean.analyze_virtual_threads(),
            vec!["No virtual threads with stuck carrier threads detected in 1 dumps."]
        );
    }

    #[test]
    fn test_native_threads() {
        let session = session_with(include_bytes!("../testdata/java11dump.log"));
        let natives = session.native_threads(0).unwrap();
        assert_eq!(natives.len(), 3);
        assert_eq!(natives[0].native_method, "java.lang.Thread.sleep(java.base@11.0.2/Native Method)");

        let carriers = session_with(include_bytes!("../testdata/carrier_stuck.log"));
        let natives = carriers.native_threads(0).unwrap();
        let names: Vec<&str> = natives.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "ForkJoinPool-1-worker-2").count(), 1);

        assert!(matches!(
            session.native_threads(5),
            Err(TdaError::IndexOutOfRange { index: 5, available: 1 })
        ));
    }

    #[test]
    fn test_zombies() {
        let session = session_with(include_bytes!("../testdata/java11dump.log"));
        assert_eq!(
            session.zombie_threads(),
            vec![ZombieThread {
                address: "0x00007f2c28b2e800".to_string(),
                dump_name: "Dump No. 1".to_string(),
                timestamp: "2019-03-21 16:02:11".to_string(),
            }]
        );
        assert!(session_with(include_bytes!("../testdata/jstack_dump.log")).zombie_threads().is_empty());
    }

    #[test]
    fn test_dump_names_continue_across_files() {
        let mut session = session_with(include_bytes!("../testdata/java8dump.log"));
        session.parse_reader(&include_bytes!("../testdata/java11dump.log")[..]).unwrap();
        let names: Vec<&str> = session.dumps().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Dump No. 1", "Dump No. 2"]);
        assert_eq!(session.thread_store().dump_names(), ["Dump No. 1", "Dump No. 2"]);
    }

    #[test]
    fn test_hints_and_clear() {
        let mut session = session_with(include_bytes!("../testdata/carrier_stuck.log"));
        let hints = session.hints(0).unwrap();
        assert!(hints.to_string().contains("Detected 1 virtual thread(s)"));
        assert!(session.hints(1).is_err());

        session.clear();
        assert!(session.dumps().is_empty());
        assert!(session.thread_store().is_empty());
        assert_eq!(session.check_for_deadlocks(), vec!["No deadlocks found in 0 dumps."]);
    }
}
