//! Cross-dump thread matcher.
//!
//! A thread is long running when it shows up under the same name in every
//! compared dump and is not idle in all of them. Only the thread store is
//! consulted, so the dumps themselves may already be gone.

use regex::Regex;

use crate::category::ResultNode;
use crate::config::LongRunningConfig;
use crate::error::{Result, TdaError};
use crate::thread_store::{ThreadRow, ThreadStore};

#[derive(Debug, Clone, Default)]
pub struct LongRunningOptions {
    /// Only names matching this pattern are candidates
    pub name_filter: Option<Regex>,
    /// Require the stack to be unchanged across all dumps
    pub identical_stacks: bool,
}

impl LongRunningOptions {
    pub fn from_config(config: &LongRunningConfig) -> Result<Self> {
        let name_filter = match config.name_filter.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern).map_err(|source| {
                TdaError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?),
            _ => None,
        };
        Ok(Self {
            name_filter,
            identical_stacks: config.identical_stacks,
        })
    }
}

/// Outcome of a matcher run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongRunning {
    /// Fewer than two dumps were given; nothing was compared
    NotEnoughDumps,
    /// Number of threads added to the result tree
    Matched(usize),
}

/// Stack part of a thread block: everything after the header line.
fn stack_of(row: &ThreadRow) -> &str {
    row.content
        .split_once('\n')
        .map(|(_, rest)| rest.trim_end())
        .unwrap_or_default()
}

/// Compare `dumps` (by name, in order) and append one child to `root` per
/// long-running thread. Each child carries one grandchild per dump with the
/// thread's state and content in that dump.
pub fn find_long_running_threads(
    root: &mut ResultNode,
    store: &ThreadStore,
    dumps: &[String],
    options: &LongRunningOptions,
) -> LongRunning {
    if dumps.len() < 2 {
        return LongRunning::NotEnoughDumps;
    }

    let mut matched = 0;
    for name in store.thread_names(&dumps[0]) {
        if let Some(filter) = &options.name_filter {
            if !filter.is_match(name) {
                continue;
            }
        }

        let rows: Option<Vec<&ThreadRow>> = dumps.iter().map(|dump| store.get(dump, name)).collect();
        let Some(rows) = rows else {
            continue;
        };
        if rows.iter().all(|row| row.state.is_idle()) {
            log::debug!("'{name}' is idle in all {} dumps", dumps.len());
            continue;
        }
        if options.identical_stacks {
            let first = stack_of(rows[0]);
            if rows.iter().skip(1).any(|row| stack_of(row) != first) {
                continue;
            }
        }

        let states: Vec<&str> = rows.iter().map(|row| row.state.as_str()).collect();
        let node = root.push(ResultNode::new(format!("{name} ({})", states.join(" -> "))));
        for (dump, row) in dumps.iter().zip(&rows) {
            node.push(ResultNode::new(format!("{dump}: {}", row.state)).with_content(row.content.clone()));
        }
        matched += 1;
    }

    log::info!("{matched} long running thread(s) across {} dumps", dumps.len());
    LongRunning::Matched(matched)
}
