//! BEA JRockit parser.
//!
//! ```text
//! ===== FULL THREAD DUMP ===============
//! Mon Mar 02 11:12:13 2009
//! BEA JRockit(R) R27.6.0-50_o-100423-1.6.0_05-20080626-2105-windows-ia32
//!
//! "Main Thread" id=1 idx=0x4 tid=4383 prio=5 alive, in native, waiting
//!     -- Waiting for notification on: java/lang/Object@0x01F0A3D8[fat lock]
//!     at java/lang/Object.wait(J)V(Native Method)
//!     -- end of trace
//!
//! Circular (deadlocked) lock chains
//! =================================
//! ...
//! ===== END OF THREAD DUMP ===============
//! ```

use std::io::Read;

use crate::dump::ThreadDumpInfo;
use crate::error::{Result, TdaError};
use crate::parser::builder::{DumpBuilder, Placement};
use crate::parser::deadlock::{parse_bea_chains, BEA_BANNER};
use crate::parser::lines::{Line, LineReader};
use crate::parser::{DumpParser, ParserKind, ParserOptions};
use crate::thread::ThreadInfo;
use crate::thread_store::ThreadStore;
use crate::tokens::bea_thread_tokens;

const START_BANNER: &str = "===== FULL THREAD DUMP";
const END_BANNER: &str = "===== END OF THREAD DUMP";

/// True if `text` carries the JRockit dump banner.
pub fn sniff(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with(START_BANNER))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Threads,
    DeadlockChains,
    OtherChains,
}

pub struct BeaParser<R> {
    lines: LineReader<R>,
    store: ThreadStore,
    options: ParserOptions,
    dumps_parsed: usize,
    deferred: Option<TdaError>,
}

impl<R: Read> BeaParser<R> {
    pub fn new(reader: R, store: ThreadStore, options: ParserOptions) -> Self {
        Self {
            lines: LineReader::new(reader, options.encoding),
            store,
            options,
            dumps_parsed: 0,
            deferred: None,
        }
    }

    fn seek_banner(&mut self) -> Result<Option<Line>> {
        while let Some(line) = self.lines.next_line()? {
            if line.text.trim_start().starts_with(START_BANNER) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    /// The first non-empty line after the banner carries the date.
    fn read_start_time(&mut self) -> Result<Option<String>> {
        while let Some(line) = self.lines.next_line()? {
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('"') || text.starts_with(END_BANNER) {
                self.lines.push_back(line);
                return Ok(None);
            }
            return Ok(Some(
                self.options
                    .date_matcher
                    .find(text)
                    .unwrap_or_else(|| text.to_string()),
            ));
        }
        Ok(None)
    }

    fn read_dump(&mut self, builder: &mut DumpBuilder) -> Result<()> {
        let mut section = Section::Threads;
        let mut thread: Option<(String, String, usize)> = None;
        let mut chains: Vec<String> = Vec::new();

        loop {
            let Some(line) = self.lines.next_line()? else {
                return Err(self.lines.error("stream ended before END OF THREAD DUMP"));
            };
            let text = line.text.trim_start();

            if text.starts_with(END_BANNER) {
                self.finish_thread(builder, thread.take());
                break;
            }
            if text.starts_with(BEA_BANNER) {
                self.finish_thread(builder, thread.take());
                section = Section::DeadlockChains;
                continue;
            }
            if text.starts_with("Blocked lock chains") || text.starts_with("Open lock chains") {
                self.finish_thread(builder, thread.take());
                section = Section::OtherChains;
                continue;
            }

            match section {
                Section::DeadlockChains => chains.push(line.text),
                Section::OtherChains => {}
                Section::Threads => {
                    if text.starts_with('"') {
                        self.finish_thread(builder, thread.take());
                        let title = text.to_string();
                        let content = format!("{title}\n");
                        thread = Some((title, content, line.number));
                    } else if text.is_empty() {
                        self.finish_thread(builder, thread.take());
                    } else if let Some((_, content, _)) = thread.as_mut() {
                        content.push_str(&line.text);
                        content.push('\n');
                    }
                }
            }
        }

        if !chains.is_empty() {
            builder.set_deadlocks(parse_bea_chains(&chains));
        }
        if builder.thread_count() == 0 {
            log::warn!("{} has no thread records", builder.name());
        }
        Ok(())
    }

    fn finish_thread(&mut self, builder: &mut DumpBuilder, pending: Option<(String, String, usize)>) {
        let Some((title, content, log_line)) = pending else {
            return;
        };
        let tokens = bea_thread_tokens(&title);
        let thread = ThreadInfo::new(title, content, log_line, tokens);
        builder.add_thread(thread, Placement::Platform, &mut self.store);
    }
}

impl<R: Read> DumpParser for BeaParser<R> {
    fn kind(&self) -> ParserKind {
        ParserKind::Bea
    }

    fn has_more_dumps(&mut self) -> bool {
        if self.deferred.is_some() {
            return true;
        }
        if self.lines.is_closed() {
            return false;
        }
        match self.seek_banner() {
            Ok(Some(line)) => {
                self.lines.push_back(line);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.deferred = Some(err);
                true
            }
        }
    }

    fn parse_next(&mut self) -> Result<Option<ThreadDumpInfo>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        if self.lines.is_closed() {
            return Err(TdaError::ParserClosed);
        }
        let Some(banner) = self.seek_banner()? else {
            return Ok(None);
        };

        let name = self.options.dump_name(self.dumps_parsed);
        self.dumps_parsed += 1;
        let mut builder = DumpBuilder::new(name, banner.number);
        let start_time = self.read_start_time()?;
        builder.set_start_time(start_time);
        self.store.begin_dump(builder.name());

        self.read_dump(&mut builder)?;
        Ok(Some(builder.finish()))
    }

    fn is_found_class_histograms(&self) -> bool {
        false
    }

    fn close(&mut self) {
        self.lines.close();
    }

    fn thread_store(&self) -> &ThreadStore {
        &self.store
    }

    fn into_thread_store(self) -> ThreadStore {
        self.store
    }
}
