//! Vendor parsers and format detection.
//!
//! [`select_parser`] peeks at the head of a stream and binds it to one of
//! three parsers. All of them are pull-based: callers loop on
//! [`DumpParser::has_more_dumps`] / [`DumpParser::parse_next`] and each call
//! consumes exactly one dump.

pub mod bea;
pub mod builder;
pub mod deadlock;
pub mod jcmd_json;
pub mod lines;
pub mod sun;

use std::fmt;
use std::io::{Cursor, Read};

use encoding_rs::{Encoding, UTF_8};
use serde::Serialize;

use crate::config::ParserConfig;
use crate::date_matcher::DateMatcher;
use crate::dump::ThreadDumpInfo;
use crate::error::{Result, TdaError};
use crate::thread_store::ThreadStore;

pub use bea::BeaParser;
pub use jcmd_json::JCmdJsonParser;
pub use sun::SunParser;

/// Upper bound on bytes read before deciding on a format.
pub const SNIFF_LIMIT: usize = 64 * 1024;

const SNIFF_CHUNK: usize = 8 * 1024;

/// The stream handed to a parser after sniffing: the peeked prefix followed
/// by the untouched rest of the input.
pub type Sniffed<R> = std::io::Chain<Cursor<Vec<u8>>, R>;

/// Common parser interface.
pub trait DumpParser {
    fn kind(&self) -> ParserKind;

    /// True if another dump header lies ahead. Only buffers input; a read
    /// error is kept and returned by the following `parse_next`.
    fn has_more_dumps(&mut self) -> bool;

    /// Parse the next dump. `Ok(None)` at the natural end of the stream.
    fn parse_next(&mut self) -> Result<Option<ThreadDumpInfo>>;

    /// True once any parsed dump carried a class histogram.
    fn is_found_class_histograms(&self) -> bool;

    /// Drop the underlying stream. Later `parse_next` calls fail with
    /// [`TdaError::ParserClosed`].
    fn close(&mut self);

    fn thread_store(&self) -> &ThreadStore;

    fn into_thread_store(self) -> ThreadStore
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    Sun,
    Bea,
    JCmdJson,
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::Sun => write!(f, "Sun/OpenJDK"),
            ParserKind::Bea => write!(f, "BEA JRockit"),
            ParserKind::JCmdJson => write!(f, "jcmd JSON"),
        }
    }
}

/// Parser settings shared by all vendors.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Number of the first `Dump No. N`
    pub dump_counter_start: usize,
    pub date_matcher: DateMatcher,
    pub encoding: &'static Encoding,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            dump_counter_start: 1,
            date_matcher: DateMatcher::default(),
            encoding: UTF_8,
        }
    }
}

impl ParserOptions {
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        let date_matcher = match config.date_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => DateMatcher::new(pattern)?,
            _ => DateMatcher::default(),
        };
        let encoding = Encoding::for_label(config.encoding.as_bytes()).unwrap_or_else(|| {
            log::warn!("unknown encoding '{}', falling back to UTF-8", config.encoding);
            UTF_8
        });
        Ok(Self {
            dump_counter_start: config.dump_counter_start,
            date_matcher,
            encoding,
        })
    }

    pub(crate) fn dump_name(&self, index: usize) -> String {
        format!("Dump No. {}", self.dump_counter_start + index)
    }
}

/// One of the supported parsers.
pub enum AnyParser<R: Read> {
    Sun(SunParser<R>),
    Bea(BeaParser<R>),
    JCmdJson(JCmdJsonParser<R>),
}

macro_rules! dispatch {
    ($self:expr, $parser:ident => $body:expr) => {
        match $self {
            AnyParser::Sun($parser) => $body,
            AnyParser::Bea($parser) => $body,
            AnyParser::JCmdJson($parser) => $body,
        }
    };
}

impl<R: Read> DumpParser for AnyParser<R> {
    fn kind(&self) -> ParserKind {
        dispatch!(self, p => p.kind())
    }

    fn has_more_dumps(&mut self) -> bool {
        dispatch!(self, p => p.has_more_dumps())
    }

    fn parse_next(&mut self) -> Result<Option<ThreadDumpInfo>> {
        dispatch!(self, p => p.parse_next())
    }

    fn is_found_class_histograms(&self) -> bool {
        dispatch!(self, p => p.is_found_class_histograms())
    }

    fn close(&mut self) {
        dispatch!(self, p => p.close())
    }

    fn thread_store(&self) -> &ThreadStore {
        dispatch!(self, p => p.thread_store())
    }

    fn into_thread_store(self) -> ThreadStore {
        dispatch!(self, p => p.into_thread_store())
    }
}

/// Decide the format from a stream prefix.
pub fn detect_format(prefix: &[u8]) -> Result<ParserKind> {
    if prefix.iter().all(u8::is_ascii_whitespace) {
        return Err(TdaError::FormatUnrecognized);
    }
    if prefix.contains(&0) {
        log::debug!("input contains NUL bytes, treating as binary");
        return Err(TdaError::FormatUnrecognized);
    }

    let text = String::from_utf8_lossy(prefix);
    if text.trim_start().starts_with('{') {
        return if jcmd_json::sniff(&text) {
            Ok(ParserKind::JCmdJson)
        } else {
            Err(TdaError::FormatUnrecognized)
        };
    }
    if bea::sniff(&text) {
        return Ok(ParserKind::Bea);
    }
    if !sun::sniff(&text) {
        log::debug!("no dump header in the first {} bytes, assuming Sun/OpenJDK", prefix.len());
    }
    Ok(ParserKind::Sun)
}

/// True once `prefix` holds enough to decide.
fn is_decisive(prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(prefix);
    let head = text.trim_start();
    if head.starts_with('{') {
        return jcmd_json::sniff(head);
    }
    bea::sniff(head) || sun::sniff_header(head)
}

fn read_prefix<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_CHUNK);
    let mut chunk = [0u8; SNIFF_CHUNK];
    while prefix.len() < SNIFF_LIMIT {
        let want = SNIFF_CHUNK.min(SNIFF_LIMIT - prefix.len());
        let read = match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        prefix.extend_from_slice(&chunk[..read]);
        if is_decisive(&prefix) {
            break;
        }
    }
    Ok(prefix)
}

/// Pick the parser for `reader`. The bytes read for detection are replayed
/// to the parser, so no input is lost.
///
/// `store` receives the thread rows of every dump the parser produces; get it
/// back with [`DumpParser::into_thread_store`].
pub fn select_parser<R: Read>(
    mut reader: R,
    store: ThreadStore,
    options: ParserOptions,
) -> Result<AnyParser<Sniffed<R>>> {
    let prefix = read_prefix(&mut reader)?;
    let kind = detect_format(&prefix)?;
    log::debug!("selected {kind} parser after {} bytes", prefix.len());

    let stream = Cursor::new(prefix).chain(reader);
    Ok(match kind {
        ParserKind::Sun => AnyParser::Sun(SunParser::new(stream, store, options)),
        ParserKind::Bea => AnyParser::Bea(BeaParser::new(stream, store, options)),
        ParserKind::JCmdJson => AnyParser::JCmdJson(JCmdJsonParser::new(stream, store, options)),
    })
}
