//! Parser for `jcmd <pid> Thread.dump_to_file -format=json` output.
//!
//! The document has one `threadDump` envelope holding thread containers;
//! `<root>` lists the platform threads, every other container (executors,
//! structured task scopes) holds virtual threads. Several envelopes may be
//! concatenated in one file.

use std::io::Read;

use serde::Deserialize;

use crate::dump::ThreadDumpInfo;
use crate::error::{Result, TdaError};
use crate::parser::builder::{DumpBuilder, Placement};
use crate::parser::{DumpParser, ParserKind, ParserOptions};
use crate::thread::ThreadInfo;
use crate::thread_store::ThreadStore;
use crate::tokens::ThreadTokens;

const ROOT_CONTAINER: &str = "<root>";

/// True if `text` looks like the start of a jcmd JSON dump.
pub fn sniff(text: &str) -> bool {
    text.trim_start().starts_with('{') && text.contains("\"threadDump\"")
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "threadDump")]
    thread_dump: JsonDump,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDump {
    #[serde(default)]
    process_id: Option<NumberOrString>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    runtime_version: Option<String>,
    #[serde(default)]
    thread_containers: Vec<JsonContainer>,
}

#[derive(Debug, Deserialize)]
struct JsonContainer {
    container: String,
    #[serde(default)]
    threads: Vec<JsonThread>,
}

#[derive(Debug, Deserialize)]
struct JsonThread {
    tid: NumberOrString,
    name: String,
    #[serde(default)]
    stack: Vec<String>,
    #[serde(default, rename = "virtual")]
    is_virtual: bool,
    #[serde(default)]
    state: Option<String>,
}

/// jcmd writes ids as strings, hand-written files often use numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn as_u64(&self) -> Option<u64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

type Envelopes<R> = serde_json::StreamDeserializer<'static, serde_json::de::IoRead<R>, Envelope>;

pub struct JCmdJsonParser<R: Read> {
    stream: Option<Envelopes<R>>,
    pending: Option<std::result::Result<Envelope, serde_json::Error>>,
    store: ThreadStore,
    options: ParserOptions,
    dumps_parsed: usize,
}

impl<R: Read> JCmdJsonParser<R> {
    /// JSON is always UTF-8; the configured encoding is not applied.
    pub fn new(reader: R, store: ThreadStore, options: ParserOptions) -> Self {
        Self {
            stream: Some(serde_json::Deserializer::from_reader(reader).into_iter()),
            pending: None,
            store,
            options,
            dumps_parsed: 0,
        }
    }

    fn pull(&mut self) -> Option<std::result::Result<Envelope, serde_json::Error>> {
        if let Some(next) = self.pending.take() {
            return Some(next);
        }
        self.stream.as_mut()?.next()
    }

    fn build(&mut self, dump: JsonDump) -> ThreadDumpInfo {
        let name = self.options.dump_name(self.dumps_parsed);
        self.dumps_parsed += 1;
        let mut builder = DumpBuilder::new(name, 1);
        builder.set_start_time(dump.time);
        self.store.begin_dump(builder.name());
        log::debug!(
            "jcmd dump of process {:?} on {}",
            dump.process_id.as_ref().and_then(NumberOrString::as_u64),
            dump.runtime_version.as_deref().unwrap_or("unknown runtime")
        );

        for container in dump.thread_containers {
            let is_root = container.container == ROOT_CONTAINER;
            for thread in container.threads {
                let placement = if is_root && !thread.is_virtual {
                    Placement::Platform
                } else {
                    Placement::Virtual
                };
                let info = thread_info(thread);
                builder.add_thread(info, placement, &mut self.store);
            }
        }
        builder.finish()
    }
}

/// Render a JSON thread the way a text dump would show it, so the rest of
/// the pipeline sees familiar content.
fn thread_info(thread: JsonThread) -> ThreadInfo {
    let tid = thread.tid.as_u64();
    let title = match tid {
        Some(tid) => format!("\"{}\" #{tid}", thread.name),
        None => format!("\"{}\"", thread.name),
    };
    let mut content = format!("{title}\n");
    if let Some(state) = thread.state.as_deref() {
        content.push_str(&format!("   java.lang.Thread.State: {state}\n"));
    }
    for frame in &thread.stack {
        content.push_str(&format!("\tat {frame}\n"));
    }

    let tokens = ThreadTokens {
        name: thread.name,
        tid,
        thread_number: tid,
        state: thread.state.map(|s| s.to_ascii_lowercase()),
        ..Default::default()
    };
    ThreadInfo::new(title, content, 0, tokens)
}

impl<R: Read> DumpParser for JCmdJsonParser<R> {
    fn kind(&self) -> ParserKind {
        ParserKind::JCmdJson
    }

    fn has_more_dumps(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        self.pending = stream.next();
        self.pending.is_some()
    }

    fn parse_next(&mut self) -> Result<Option<ThreadDumpInfo>> {
        if self.stream.is_none() {
            return Err(TdaError::ParserClosed);
        }
        match self.pull() {
            None => Ok(None),
            Some(Ok(envelope)) => Ok(Some(self.build(envelope.thread_dump))),
            Some(Err(err)) => {
                let (line, column) = (err.line(), err.column());
                if err.is_eof() {
                    Err(TdaError::parse(line, column as u64, "JSON document ended early"))
                } else {
                    Err(err.into())
                }
            }
        }
    }

    fn is_found_class_histograms(&self) -> bool {
        false
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending = None;
    }

    fn thread_store(&self) -> &ThreadStore {
        &self.store
    }

    fn into_thread_store(self) -> ThreadStore {
        self.store
    }
}
