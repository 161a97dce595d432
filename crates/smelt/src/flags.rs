//! Process-wide debug-flag registry.
//!
//! Recognized tags gate logging branches and the two pass kill-switches:
//! `-log-inst`, `-log-spec`, `-dumpjd`, `-dbgloads`, `-no-inst`, `-no-spec`.
//! Flags may be added before any session exists, so the set is global and
//! lock-guarded rather than session-owned.

use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::RwLock;

static DEBUG_FLAGS: OnceLock<RwLock<HashSet<String>>> = OnceLock::new();

fn flags() -> &'static RwLock<HashSet<String>> {
    DEBUG_FLAGS.get_or_init(|| RwLock::new(HashSet::new()))
}

pub fn add_debug_flag(flag: &str) {
    flags().write().insert(flag.to_string());
}

pub fn is_debug_flag(flag: &str) -> bool {
    flags().read().contains(flag)
}

#[cfg(test)]
pub(crate) fn remove_debug_flag(flag: &str) {
    flags().write().remove(flag);
}

/// Serializes unit tests that toggle the process-wide flag set.
#[cfg(test)]
pub(crate) static TEST_FLAGS_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
