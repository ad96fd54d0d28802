//! Line reader with decoding, position tracking and pushback.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{Result, TdaError};

/// One decoded line without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// 1-based line number
    pub number: usize,
    /// Byte offset of the first byte of the line
    pub offset: u64,
}

/// Reads lines lazily from `R`. The reader is owned and dropped on `close`.
pub struct LineReader<R> {
    inner: Option<BufReader<R>>,
    encoding: &'static Encoding,
    pending: VecDeque<Line>,
    buf: Vec<u8>,
    next_number: usize,
    next_offset: u64,
    /// Position of the most recently returned line
    last: (usize, u64),
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R, encoding: &'static Encoding) -> Self {
        Self {
            inner: Some(BufReader::new(reader)),
            encoding,
            pending: VecDeque::new(),
            buf: Vec::new(),
            next_number: 1,
            next_offset: 0,
            last: (0, 0),
        }
    }

    fn read_raw(&mut self) -> Result<Option<Line>> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(TdaError::ParserClosed);
        };
        self.buf.clear();
        let read = inner.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let text = if self.encoding == UTF_8 {
            String::from_utf8_lossy(&self.buf[..end]).into_owned()
        } else {
            self.encoding
                .decode_without_bom_handling(&self.buf[..end])
                .0
                .into_owned()
        };

        let line = Line {
            text,
            number: self.next_number,
            offset: self.next_offset,
        };
        self.next_number += 1;
        self.next_offset += read as u64;
        Ok(Some(line))
    }

    pub fn next_line(&mut self) -> Result<Option<Line>> {
        let line = match self.pending.pop_front() {
            Some(line) => Some(line),
            None => self.read_raw()?,
        };
        if let Some(line) = &line {
            self.last = (line.number, line.offset);
        }
        Ok(line)
    }

    /// Look at the next line without consuming it.
    pub fn peek_line(&mut self) -> Result<Option<&Line>> {
        if self.pending.is_empty() {
            if let Some(line) = self.read_raw()? {
                self.pending.push_back(line);
            }
        }
        Ok(self.pending.front())
    }

    /// Return a line so that the next `next_line` yields it again.
    pub fn push_back(&mut self, line: Line) {
        self.pending.push_front(line);
    }

    /// Line number and byte offset of the last line handed out.
    pub fn position(&self) -> (usize, u64) {
        self.last
    }

    /// Error at the current position.
    pub fn error(&self, message: impl Into<String>) -> TdaError {
        let (line, offset) = self.last;
        TdaError::parse(line, offset, message)
    }

    pub fn close(&mut self) {
        self.inner = None;
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}
