//! Line tokenizer utilities.
//!
//! Turns a single thread header line into a [`ThreadTokens`] record. Header
//! layouts drift between JVM vendors and versions:
//!
//! ```text
//! JDK 6   "main" prio=10 tid=0x000000004a6f1000 nid=0x5ef1 runnable [0x00007f1c4a2d1000]
//! JDK 8   "main" #1 prio=5 os_prio=0 tid=0x00007f... nid=0x1c03 runnable [0x00007f...]
//! JDK 11  "VM Thread" os_prio=0 cpu=12.3ms elapsed=4.5s tid=0x00007f... nid=0x1c09 runnable
//! JDK 21  "ForkJoinPool-1-worker-1" #11 daemon [11] prio=5 os_prio=0 ... nid=0x1ac7 runnable  [0x...]
//! HP-UX   "main" prio=10 tid=0x0004a8c0 nid=1 lwp_id=1298762 waiting on condition [0x7ffe...]
//! VisualVM "RMI TCP Accept-0" - Thread t@16
//! JRockit "Main Thread" id=1 idx=0x4 tid=4383 prio=5 alive, in native, waiting
//! ```
//!
//! Every field is extracted by its own `key=value` pattern rather than by
//! position, so a missing or extra field only affects that field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static THREAD_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)#(\d+)\b").unwrap());

static OS_THREAD_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)\[(\d+)\](?:\s|$)").unwrap());

static DAEMON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:^|[\s,])daemon(?:[\s,]|$)").unwrap());

static PRIORITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)prio=(\d+)").unwrap());

static TID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)tid=(?:0x)?([0-9a-fA-F]+)").unwrap());

static NID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)nid=(0x[0-9a-fA-F]+|\d+)").unwrap());

static ADDRESS_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:0x)?[0-9a-fA-F]+(?:\.\.(?:0x)?[0-9a-fA-F]+)?\]\s*$").unwrap());

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]+=\S*$").unwrap());

static VISUALVM_THREAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\s+Thread\s+t@(\d+)").unwrap());

static BEA_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)id=(\d+)").unwrap());

static BEA_IDX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)idx=(0x[0-9a-fA-F]+|\d+)").unwrap());

static BEA_TID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)tid=(\d+)").unwrap());

static BEA_STATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)prio=\d+\s+(.*)$").unwrap());

/// Parsed fields of one thread header line.
///
/// Any field may be absent: consumers must treat `None` as "not reported by
/// this dialect", never as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadTokens {
    /// Bare thread name, quotes removed
    pub name: String,
    /// `"Daemon"` for daemon threads, `None` otherwise
    pub thread_type: Option<String>,
    pub priority: Option<u32>,
    /// Decimal value of `tid=` (JavaThread address on HotSpot, Java id elsewhere)
    pub tid: Option<u64>,
    /// Decimal value of `nid=` (native/OS thread id)
    pub nid: Option<u64>,
    /// Raw state text, e.g. `runnable` or `waiting on condition`
    pub state: Option<String>,
    /// Bracketed stack address range, verbatim
    pub address_range: Option<String>,
    /// `#N` thread number (JDK 8+) or `t@N` (VisualVM)
    pub thread_number: Option<u64>,
    /// `[N]` OS thread index (JDK 19+) or JRockit `idx=`
    pub thread_index: Option<u64>,
}

impl ThreadTokens {
    pub fn is_daemon(&self) -> bool {
        self.thread_type.as_deref() == Some("Daemon")
    }

    /// Positional view in the classic seven-slot layout:
    /// name, type, priority, tid, nid, state, address range.
    pub fn to_row(&self) -> [String; 7] {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        [
            self.name.clone(),
            opt(&self.thread_type),
            opt(&self.priority),
            opt(&self.tid),
            opt(&self.nid),
            opt(&self.state),
            opt(&self.address_range),
        ]
    }
}

/// Splits `"name" rest` into the name and the remainder after the closing
/// quote. The last quote on the line closes the name so that names with
/// embedded quotes (URLs, query strings) survive.
///
/// Returns `None` when the line has no closing quote.
pub fn split_quoted_name(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let body = trimmed.strip_prefix('"')?;
    let close = body.rfind('"')?;
    Some((&body[..close], &body[close + 1..]))
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// `nid=0x1ac7` is hex, `nid=30467` (JDK 19+, HP-UX) is already decimal.
fn parse_nid(text: &str) -> Option<u64> {
    match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Tokenize a Sun/OpenJDK (incl. HP-UX and VisualVM) thread header line.
pub fn sun_thread_tokens(line: &str) -> ThreadTokens {
    let line = line.trim_end();
    let (name, rest) = match split_quoted_name(line) {
        Some(parts) => parts,
        None => {
            log::debug!("thread header without closing quote: {line}");
            (line.trim_start().trim_start_matches('"'), "")
        }
    };

    let mut tokens = ThreadTokens {
        name: name.to_string(),
        ..Default::default()
    };

    if DAEMON.is_match(rest) {
        tokens.thread_type = Some("Daemon".to_string());
    }
    tokens.priority = capture(&PRIORITY, rest).and_then(|p| p.parse().ok());
    tokens.tid = capture(&TID, rest).and_then(parse_hex);
    tokens.thread_number = capture(&THREAD_NUMBER, rest)
        .or_else(|| capture(&VISUALVM_THREAD, rest))
        .and_then(|n| n.parse().ok());

    let mut state_area = rest;
    if let Some(m) = ADDRESS_RANGE.find(rest) {
        tokens.address_range = Some(m.as_str().trim().to_string());
        state_area = &rest[..m.start()];
    }

    // The OS thread index sits before prio=, so look only at the head of the line.
    let head_end = rest.find("prio=").unwrap_or(state_area.len()).min(state_area.len());
    tokens.thread_index = capture(&OS_THREAD_INDEX, &rest[..head_end]).and_then(|n| n.parse().ok());

    if let Some(caps) = NID.captures(state_area) {
        let nid = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        tokens.nid = parse_nid(nid);
        let after = &state_area[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
        tokens.state = state_text(after);
    } else if tokens.tid.is_none() && tokens.priority.is_none() {
        log::debug!("thread header without tid/nid/prio fields: {line}");
    }

    tokens
}

/// Remaining words after `nid=`, skipping vendor `key=value` extras (`lwp_id=`).
fn state_text(after_nid: &str) -> Option<String> {
    let words: Vec<&str> = after_nid
        .split_whitespace()
        .skip_while(|w| KEY_VALUE.is_match(w))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Tokenize a BEA JRockit thread header line.
///
/// JRockit reports the Java thread id as `id=` and the OS thread id as
/// `tid=`; they are mapped to `tid` and `nid` so downstream code can look at
/// the same slots regardless of vendor.
pub fn bea_thread_tokens(line: &str) -> ThreadTokens {
    let line = line.trim_end();
    let (name, rest) = split_quoted_name(line).unwrap_or_else(|| {
        log::debug!("JRockit thread header without closing quote: {line}");
        (line.trim_start().trim_start_matches('"'), "")
    });

    let mut tokens = ThreadTokens {
        name: name.to_string(),
        ..Default::default()
    };

    tokens.tid = capture(&BEA_ID, rest).and_then(|v| v.parse().ok());
    tokens.nid = capture(&BEA_TID, rest).and_then(|v| v.parse().ok());
    tokens.thread_index = capture(&BEA_IDX, rest).and_then(parse_nid);
    tokens.priority = capture(&PRIORITY, rest).and_then(|p| p.parse().ok());
    tokens.state = capture(&BEA_STATE, rest)
        .map(|s| s.trim().trim_end_matches(',').to_string())
        .filter(|s| !s.is_empty());
    if tokens
        .state
        .as_deref()
        .map(|s| s.split(',').any(|flag| flag.trim().eq_ignore_ascii_case("daemon")))
        .unwrap_or(false)
    {
        tokens.thread_type = Some("Daemon".to_string());
    }

    tokens
}
