//! tda - Java thread dump analyzer
//!
//! This library provides the core functionality for the `tda` CLI tool:
//! format detection and vendor parsers for JVM thread dumps, the categorized
//! dump model, and the diagnostic analyses run over it.

pub mod analyzer;
pub mod category;
pub mod cli;
pub mod config;
pub mod date_matcher;
pub mod dump;
pub mod error;
pub mod frames;
pub mod long_running;
pub mod output;
pub mod parser;
pub mod session;
pub mod smr;
pub mod thread;
pub mod thread_store;
pub mod tokens;

// Re-export commonly used types
pub use analyzer::{Analyzer, Hints};
pub use category::{Category, ResultNode};
pub use config::Config;
pub use dump::ThreadDumpInfo;
pub use error::{Result, TdaError};
pub use long_running::{find_long_running_threads, LongRunning, LongRunningOptions};
pub use parser::{select_parser, AnyParser, DumpParser, ParserKind, ParserOptions};
pub use session::Session;
pub use smr::resolve_smr_addresses;
pub use thread::{MonitorInfo, ThreadInfo, ThreadState};
pub use thread_store::ThreadStore;
