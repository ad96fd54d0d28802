//! SMR address resolution.
//!
//! JDK 11+ prints the VM's thread list before the threads:
//!
//! ```text
//! Threads class SMR info:
//! _java_thread_list=0x00007f2c2c001f40, length=11, elements={
//! 0x00007f2c94017000, 0x00007f2c94166000, 0x00007f2c94168000,
//! }
//! ```
//!
//! Each element is the address of a JavaThread and should equal the `tid=`
//! of some thread in the same dump. Elements without a match are reported
//! as zombies.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::dump::ThreadDumpInfo;

static HEX_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());

/// One element of the SMR list and the thread it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmrEntry {
    pub address: String,
    pub thread: Option<String>,
}

/// Addresses listed between `elements={` and `}`, in order.
pub fn smr_addresses(smr_info: &str) -> Vec<String> {
    let Some(start) = smr_info.find("elements={") else {
        return Vec::new();
    };
    let body = &smr_info[start + "elements={".len()..];
    let body = body.find('}').map(|end| &body[..end]).unwrap_or(body);
    HEX_ADDRESS
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn parse_address(address: &str) -> Option<u64> {
    u64::from_str_radix(address.trim_start_matches("0x"), 16).ok()
}

/// Resolve every SMR element of `dump` against its threads' tids.
pub fn resolve(dump: &ThreadDumpInfo) -> Vec<SmrEntry> {
    let Some(smr_info) = &dump.smr_info else {
        return Vec::new();
    };

    let mut by_tid: HashMap<u64, String> = HashMap::new();
    for category in [&dump.threads, &dump.virtual_threads] {
        for thread in category.threads() {
            if let Some(tid) = thread.tokens.tid {
                by_tid.entry(tid).or_insert_with(|| thread.name().to_string());
            }
        }
    }

    smr_addresses(smr_info)
        .into_iter()
        .map(|address| {
            let thread = parse_address(&address).and_then(|value| by_tid.get(&value).cloned());
            SmrEntry { address, thread }
        })
        .collect()
}

/// Addresses of `dump`'s SMR list that match no thread, in encounter order.
/// Pure: repeated calls on the same dump yield the same list.
pub fn resolve_smr_addresses(dump: &ThreadDumpInfo) -> Vec<String> {
    resolve(dump)
        .into_iter()
        .filter(|entry| entry.thread.is_none())
        .map(|entry| entry.address)
        .collect()
}
