//! Per-(function, argument) profile table.
//!
//! Maps a generic function address to an `IntMap` from argument value to a
//! tagged state: a raw slot value at or below `SPECIALIZATION_THRESHOLD` is a
//! call count, anything above it is the native address of a specialized
//! function. The fusion relies on JIT code addresses being numerically far
//! above the threshold; `ArgState` keeps every read and write of the slot
//! behind an explicit decode/encode so the invariant is checked rather than
//! assumed.

use std::collections::HashMap;

use crate::intmap::IntMap;

/// Call count at which the resolver triggers specialization.
pub const SPECIALIZATION_THRESHOLD: u64 = 100;

/// Decoded view of a profile slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgState {
    /// Number of observed calls with this argument.
    Count(u64),
    /// Native address of the specialized function.
    Compiled(u64),
}

impl ArgState {
    pub fn decode(raw: u64) -> ArgState {
        if raw <= SPECIALIZATION_THRESHOLD {
            ArgState::Count(raw)
        } else {
            ArgState::Compiled(raw)
        }
    }

    /// The raw slot value, or `None` when the state cannot be represented
    /// (a count above the threshold, or an address at or below it).
    pub fn encode(self) -> Option<u64> {
        match self {
            ArgState::Count(c) if c <= SPECIALIZATION_THRESHOLD => Some(c),
            ArgState::Compiled(a) if a > SPECIALIZATION_THRESHOLD => Some(a),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct ProfileTable {
    funcs: HashMap<u64, IntMap>,
}

impl ProfileTable {
    pub fn new() -> Self {
        ProfileTable::default()
    }

    pub fn arg_state(&self, fn_addr: u64, arg: u64) -> Option<ArgState> {
        self.funcs
            .get(&fn_addr)
            .and_then(|m| m.find(arg))
            .map(ArgState::decode)
    }

    /// Store a raw slot value, creating the per-function map on first use.
    pub fn record(&mut self, fn_addr: u64, arg: u64, raw: u64) {
        self.funcs.entry(fn_addr).or_default().emplace(arg, raw);
    }

    pub fn func_profile(&self, fn_addr: u64) -> Option<&IntMap> {
        self.funcs.get(&fn_addr)
    }

    /// Number of generic functions with at least one profiled argument.
    pub fn profiled_functions(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}
