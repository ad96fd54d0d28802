//! Thread and monitor records.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::tokens::ThreadTokens;

static THREAD_STATE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"java\.lang\.Thread\.State:\s*(\S+)(?:\s+\(([^)]*)\))?").unwrap());

static SUN_MONITOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*-\s+(locked|waiting to lock|waiting on|parking to wait for|waiting to re-lock in wait\(\))\s+(<[^>]+>.*|\S+@\S+)",
    )
    .unwrap()
});

static BEA_MONITOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\^?--\s+(Holding lock|Blocked trying to get lock|Waiting for notification on):\s+(\S+)").unwrap()
});

/// Normalized thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    Runnable,
    Waiting,
    TimedWaiting,
    Blocked,
    Parking,
    Other,
}

impl ThreadState {
    pub const ALL: [ThreadState; 6] = [
        ThreadState::Runnable,
        ThreadState::Waiting,
        ThreadState::TimedWaiting,
        ThreadState::Blocked,
        ThreadState::Parking,
        ThreadState::Other,
    ];

    /// Classify a thread from its header state text and, where that text is
    /// ambiguous, the `java.lang.Thread.State:` line of its content.
    ///
    /// Header text such as `waiting on condition` or `in Object.wait()` does
    /// not distinguish timed from untimed waits, so the Thread.State line wins
    /// when present. JRockit and HP headers carry no such line; their
    /// `waiting` and `sleeping` tokens map to the idle states directly.
    pub fn classify(state_token: Option<&str>, content: &str) -> ThreadState {
        let mut fallback = ThreadState::Other;
        if let Some(token) = state_token {
            let token = token.to_ascii_lowercase();
            if token.contains("waiting for monitor entry") || token.contains("blocked") {
                return ThreadState::Blocked;
            }
            if token.contains("runnable") {
                return ThreadState::Runnable;
            }
            if token.contains("parking") || token.contains("parked") {
                return ThreadState::Parking;
            }
            if token.contains("sleeping") {
                fallback = ThreadState::TimedWaiting;
            } else if token.contains("waiting") || token.contains("object.wait()") {
                fallback = ThreadState::Waiting;
            }
        }
        Self::from_state_line(content).unwrap_or(fallback)
    }

    /// State named by the `java.lang.Thread.State:` line, if the content has one.
    pub fn from_state_line(content: &str) -> Option<ThreadState> {
        let caps = THREAD_STATE_LINE.captures(content)?;
        let parking = caps
            .get(2)
            .map(|detail| detail.as_str() == "parking")
            .unwrap_or(false);
        let state = match caps.get(1)?.as_str() {
            "RUNNABLE" => ThreadState::Runnable,
            "BLOCKED" => ThreadState::Blocked,
            "WAITING" | "TIMED_WAITING" if parking => ThreadState::Parking,
            "WAITING" => ThreadState::Waiting,
            "TIMED_WAITING" => ThreadState::TimedWaiting,
            _ => ThreadState::Other,
        };
        Some(state)
    }

    /// Waiting, timed waiting and parked threads are idle; everything else
    /// (including blocked and unclassified threads) counts as active.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            ThreadState::Waiting | ThreadState::TimedWaiting | ThreadState::Parking
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Parking => "PARKING",
            ThreadState::Other => "OTHER",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One thread of one dump.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    /// Header line as it appeared, quotes included
    pub title: String,
    /// Short descriptor, e.g. `RUNNABLE, prio=5, daemon`
    pub info: String,
    /// Verbatim block for this thread: header, state line, frames, lock lines
    pub content: String,
    /// 1-based line of the header in the source stream
    pub log_line: usize,
    pub tokens: ThreadTokens,
    pub state: ThreadState,
}

impl ThreadInfo {
    pub fn new(title: String, content: String, log_line: usize, tokens: ThreadTokens) -> Self {
        let state = ThreadState::classify(tokens.state.as_deref(), &content);
        let info = describe(&tokens, state);
        Self {
            title,
            info,
            content,
            log_line,
            tokens,
            state,
        }
    }

    /// Bare thread name without quotes.
    pub fn name(&self) -> &str {
        &self.tokens.name
    }

    pub fn is_carrier(&self) -> bool {
        self.content.contains("Carrying virtual thread")
    }

    /// Monitor relations found in this thread's lock lines, in order.
    pub fn monitor_lines(&self) -> impl Iterator<Item = MonitorLine> + '_ {
        self.content.lines().filter_map(parse_monitor_line)
    }
}

fn describe(tokens: &ThreadTokens, state: ThreadState) -> String {
    let mut info = state.to_string();
    if let Some(priority) = tokens.priority {
        info.push_str(&format!(", prio={priority}"));
    }
    if tokens.is_daemon() {
        info.push_str(", daemon");
    }
    info
}

/// How a thread relates to a monitor on one lock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorRelation {
    /// `- locked`, `-- Holding lock:`
    Locked,
    /// `- waiting to lock`, `-- Blocked trying to get lock:`
    WaitingToLock,
    /// `- waiting on`, `- parking to wait for`, re-lock, `-- Waiting for notification on:`
    Sleeping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLine {
    pub relation: MonitorRelation,
    /// `<0x000000076ab62208>` or the JRockit `class@address` token
    pub address: String,
    /// Remaining description, e.g. `(a java.lang.Object)`
    pub description: String,
}

impl MonitorLine {
    /// Key used to merge the same monitor across threads.
    pub fn title(&self) -> String {
        if self.description.is_empty() {
            self.address.clone()
        } else {
            format!("{} {}", self.address, self.description)
        }
    }
}

/// Parse a Sun (`- locked <0x..> (a Foo)`) or JRockit (`-- Holding lock: Foo@0x..[thin lock]`) lock line.
pub fn parse_monitor_line(line: &str) -> Option<MonitorLine> {
    if let Some(caps) = SUN_MONITOR.captures(line) {
        let relation = match &caps[1] {
            "locked" => MonitorRelation::Locked,
            "waiting to lock" => MonitorRelation::WaitingToLock,
            _ => MonitorRelation::Sleeping,
        };
        let target = caps[2].trim();
        if target.starts_with("<no object reference") {
            return None;
        }
        let (address, description) = match target.find('>') {
            Some(end) if target.starts_with('<') => (&target[..=end], target[end + 1..].trim()),
            _ => (target, ""),
        };
        return Some(MonitorLine {
            relation,
            address: address.to_string(),
            description: description.to_string(),
        });
    }

    let caps = BEA_MONITOR.captures(line)?;
    let relation = match &caps[1] {
        "Holding lock" => MonitorRelation::Locked,
        "Blocked trying to get lock" => MonitorRelation::WaitingToLock,
        _ => MonitorRelation::Sleeping,
    };
    let target = &caps[2];
    let address = target.split('[').next().unwrap_or(target);
    Some(MonitorLine {
        relation,
        address: address.to_string(),
        description: String::new(),
    })
}

/// A monitor and the threads related to it within one dump.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorInfo {
    pub title: String,
    pub locking: Vec<String>,
    pub waiting: Vec<String>,
    pub sleeping: Vec<String>,
}

impl MonitorInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn locks(&self) -> usize {
        self.locking.len()
    }

    pub fn waits(&self) -> usize {
        self.waiting.len()
    }

    pub fn sleeps(&self) -> usize {
        self.sleeping.len()
    }

    /// Tree label, e.g. `<0x..> (a java.lang.Object): 1 Thread(s) locking, 2 waiting, 0 sleeping`.
    pub fn label(&self) -> String {
        format!(
            "{}: {} Thread(s) locking, {} waiting, {} sleeping",
            self.title,
            self.locks(),
            self.waits(),
            self.sleeps()
        )
    }
}
