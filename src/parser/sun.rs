//! Sun/OpenJDK parser (jstack, `jcmd Thread.print`, kill -3 output).
//!
//! Handles JDK 6 through 21+ layouts, HP-UX and remote VisualVM variants.
//! The scanner is line oriented:
//!
//! 1. skip preamble until `Full thread dump ...`, remembering the last
//!    timestamp seen on the way;
//! 2. optional `Threads class SMR info:` block (JDK 11+);
//! 3. thread records, each opened by a line starting with `"`;
//! 4. trailing sections: JNI references, heap summary, deadlock report,
//!    class histogram;
//! 5. the dump ends at the next dump header or at end of stream.

use std::io::Read;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::analyzer::STUCK_CARRIER_PHRASE;
use crate::dump::{HeapInfo, HistogramInfo, ThreadDumpInfo};
use crate::error::{Result, TdaError};
use crate::frames::first_frame_after;
use crate::parser::builder::{DumpBuilder, Placement};
use crate::parser::deadlock::DeadlockParser;
use crate::parser::lines::{Line, LineReader};
use crate::parser::{bea, DumpParser, ParserKind, ParserOptions};
use crate::thread::{ThreadInfo, ThreadState};
use crate::thread_store::ThreadStore;
use crate::tokens::{split_quoted_name, sun_thread_tokens};

const SMR_MARKER: &str = "Threads class SMR info:";
const CARRIER_MARKER: &str = "Carrying virtual thread";

static HISTOGRAM_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*num\s+#instances\s+#bytes\s+class name").unwrap());

static THREAD_HEADER_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^"[^\n]*"(?:[^\n]*\snid=|\s+-\s+Thread\s+t@\d+)"#).unwrap());

fn is_dump_header(line: &str) -> bool {
    line.contains("Full thread dump") || line.contains("Full Java thread dump")
}

/// True if `text` contains a Sun dump header.
pub fn sniff_header(text: &str) -> bool {
    text.lines().any(is_dump_header)
}

/// True if `text` looks like Sun/OpenJDK output: a dump header, or thread
/// headers with `nid=` / VisualVM `t@N`. JRockit dumps are rejected.
pub fn sniff(text: &str) -> bool {
    if bea::sniff(text) {
        return false;
    }
    sniff_header(text) || THREAD_HEADER_HINT.is_match(text)
}

/// Lines that open a thread record or a trailing section.
fn starts_section(text: &str) -> bool {
    text.starts_with('"')
        || text.trim_start().starts_with(SMR_MARKER)
        || text.starts_with("JNI global references")
        || text.trim() == "Heap"
        || DeadlockParser::is_banner(text)
}

#[derive(Debug)]
struct PendingThread {
    title: String,
    content: String,
    log_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Threads,
    Smr { closed: bool },
    Heap,
    Histogram,
    Deadlock,
}

pub struct SunParser<R> {
    lines: LineReader<R>,
    store: ThreadStore,
    options: ParserOptions,
    dumps_parsed: usize,
    pending_time: Option<String>,
    found_histograms: bool,
    deferred: Option<TdaError>,
}

impl<R: Read> SunParser<R> {
    pub fn new(reader: R, store: ThreadStore, options: ParserOptions) -> Self {
        Self {
            lines: LineReader::new(reader, options.encoding),
            store,
            options,
            dumps_parsed: 0,
            pending_time: None,
            found_histograms: false,
            deferred: None,
        }
    }

    fn note_time(&mut self, text: &str) {
        if let Some(time) = self.options.date_matcher.find(text) {
            self.pending_time = Some(time);
        }
    }

    /// Consume preamble up to and including the next dump header.
    fn seek_header(&mut self) -> Result<Option<Line>> {
        while let Some(line) = self.lines.next_line()? {
            self.note_time(&line.text);
            if is_dump_header(&line.text) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn read_dump(&mut self, builder: &mut DumpBuilder) -> Result<()> {
        let mut section = Section::Threads;
        let mut thread: Option<PendingThread> = None;
        let mut smr = String::new();
        let mut heap = HeapInfo::default();
        let mut histogram = HistogramInfo::default();
        let mut deadlock: Option<DeadlockParser> = None;
        let mut reached_next_dump = false;

        while let Some(line) = self.lines.next_line()? {
            if is_dump_header(&line.text) {
                if let Section::Smr { closed: false } = section {
                    return Err(self.lines.error("dump header inside SMR elements block"));
                }
                self.lines.push_back(line);
                reached_next_dump = true;
                break;
            }

            match section {
                Section::Smr { closed } => {
                    if closed && (line.text.trim().is_empty() || line.text.starts_with('"')) {
                        builder.set_smr_info(std::mem::take(&mut smr).trim_end().to_string());
                        section = Section::Threads;
                        if line.text.starts_with('"') {
                            self.lines.push_back(line);
                        }
                        continue;
                    }
                    if line.text.contains('}') {
                        section = Section::Smr { closed: true };
                    }
                    smr.push_str(&line.text);
                    smr.push('\n');
                    continue;
                }
                Section::Heap => {
                    if line.text.trim().is_empty() {
                        builder.set_heap_info(std::mem::take(&mut heap));
                        section = Section::Threads;
                    } else {
                        heap.lines.push(line.text);
                    }
                    continue;
                }
                Section::Histogram => {
                    // jmap output without a `Total` line ends at the next section.
                    if starts_section(&line.text) {
                        builder.set_histogram(std::mem::take(&mut histogram));
                        section = Section::Threads;
                        self.lines.push_back(line);
                        continue;
                    }
                    if !histogram.push_line(&line.text) {
                        builder.set_histogram(std::mem::take(&mut histogram));
                        section = Section::Threads;
                    }
                    continue;
                }
                Section::Deadlock => {
                    let more = deadlock
                        .as_mut()
                        .map(|parser| parser.push_line(&line.text))
                        .unwrap_or(false);
                    if !more {
                        if let Some(parser) = deadlock.take() {
                            builder.set_deadlocks(parser.finish());
                        }
                        section = Section::Threads;
                    }
                    continue;
                }
                Section::Threads => {}
            }

            let text = line.text.as_str();
            if text.starts_with('"') {
                self.finish_thread(builder, thread.take());
                thread = Some(self.start_thread(line)?);
            } else if text.trim_start().starts_with(SMR_MARKER) {
                self.finish_thread(builder, thread.take());
                smr.push_str(text);
                smr.push('\n');
                section = Section::Smr { closed: false };
            } else if DeadlockParser::is_banner(text) {
                self.finish_thread(builder, thread.take());
                let mut parser = DeadlockParser::new();
                parser.push_line(text);
                deadlock = Some(parser);
                section = Section::Deadlock;
            } else if HISTOGRAM_HEADER.is_match(text) {
                self.finish_thread(builder, thread.take());
                self.found_histograms = true;
                section = Section::Histogram;
            } else if text.trim() == "Heap" {
                self.finish_thread(builder, thread.take());
                heap.lines.push(line.text);
                section = Section::Heap;
            } else if text.starts_with("JNI global references") {
                self.finish_thread(builder, thread.take());
            } else if text.trim().is_empty() {
                if let Some(pending) = thread.as_mut() {
                    let keeps_going = self
                        .lines
                        .peek_line()?
                        .map(|next| next.text.trim_start().starts_with("Locked ownable synchronizers:"))
                        .unwrap_or(false);
                    if keeps_going {
                        pending.content.push('\n');
                    } else {
                        self.finish_thread(builder, thread.take());
                    }
                }
            } else if let Some(pending) = thread.as_mut() {
                pending.content.push_str(text);
                pending.content.push('\n');
            } else {
                self.note_time(text);
            }
        }

        self.finish_thread(builder, thread.take());
        match section {
            Section::Smr { closed: false } => {
                return Err(self.lines.error("stream ended inside SMR elements block"));
            }
            Section::Smr { closed: true } => builder.set_smr_info(smr.trim_end().to_string()),
            Section::Heap => builder.set_heap_info(heap),
            Section::Histogram => builder.set_histogram(histogram),
            Section::Deadlock => {
                if let Some(parser) = deadlock {
                    builder.set_deadlocks(parser.finish());
                }
            }
            Section::Threads => {}
        }

        if builder.thread_count() == 0 {
            if reached_next_dump {
                log::warn!("{} has no thread records", builder.name());
            } else {
                return Err(self.lines.error("stream ended before any thread record of the dump"));
            }
        }
        Ok(())
    }

    fn start_thread(&mut self, line: Line) -> Result<PendingThread> {
        let mut title = line.text;
        if split_quoted_name(&title).is_none() {
            let next_has_quote = self.lines.peek_line()?.map(|next| next.text.contains('"'));
            match next_has_quote {
                None => return Err(self.lines.error("stream ended inside thread header")),
                Some(true) => {
                    if let Some(next) = self.lines.next_line()? {
                        title.push('\n');
                        title.push_str(&next.text);
                    }
                }
                Some(false) => log::debug!("unterminated thread name at line {}", line.number),
            }
        }
        let content = format!("{title}\n");
        Ok(PendingThread {
            title,
            content,
            log_line: line.number,
        })
    }

    fn finish_thread(&mut self, builder: &mut DumpBuilder, pending: Option<PendingThread>) {
        let Some(pending) = pending else {
            return;
        };
        let tokens = sun_thread_tokens(&pending.title);
        let mut content = pending.content;
        let carrier = content.contains(CARRIER_MARKER);
        if carrier {
            annotate_carrier(&mut content, tokens.state.as_deref());
        }
        let thread = ThreadInfo::new(pending.title, content, pending.log_line, tokens);
        let placement = if carrier {
            Placement::Carrier
        } else {
            Placement::Platform
        };
        builder.add_thread(thread, placement, &mut self.store);
    }
}

/// Append a note to a RUNNABLE carrier whose mounted virtual thread sits in
/// application code.
fn annotate_carrier(content: &mut String, state_token: Option<&str>) {
    if content.contains(STUCK_CARRIER_PHRASE) {
        return;
    }
    if ThreadState::classify(state_token, content) != ThreadState::Runnable {
        return;
    }
    let Some(frame) = first_frame_after(content, CARRIER_MARKER) else {
        return;
    };
    if frame.is_jdk() {
        return;
    }
    content.push_str(&format!(
        "Note: This {STUCK_CARRIER_PHRASE} ({}). The mounted virtual thread does not yield, \
         so the carrier cannot run other virtual threads.\n",
        frame.method
    ));
}

impl<R: Read> DumpParser for SunParser<R> {
    fn kind(&self) -> ParserKind {
        ParserKind::Sun
    }

    fn has_more_dumps(&mut self) -> bool {
        if self.deferred.is_some() {
            return true;
        }
        if self.lines.is_closed() {
            return false;
        }
        match self.seek_header() {
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
        let Some(header) = self.seek_header()? else {
            return Ok(None);
        };

        let name = self.options.dump_name(self.dumps_parsed);
        self.dumps_parsed += 1;
        let mut builder = DumpBuilder::new(name, header.number);
        builder.set_start_time(self.pending_time.take());
        self.store.begin_dump(builder.name());
        log::debug!("{} starts at line {}", builder.name(), header.number);

        self.read_dump(&mut builder)?;
        Ok(Some(builder.finish()))
    }

    fn is_found_class_histograms(&self) -> bool {
        self.found_histograms
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
