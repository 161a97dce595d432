//! Open-addressed Robin-Hood `u64 -> u64` hash table.
//!
//! This is the per-function counter/address store consulted by the resolver
//! on every instrumented call, so lookup latency dominates dispatch overhead.
//! Robin-Hood displacement bounds probe-distance variance, which keeps the
//! worst-case probe short even at the 5/8 load ceiling.
//!
//! Capacity is always a power of two (initial 8) and grows by 4x. Erased
//! slots become tombstones: they never stop a probe (only `Empty` does) and
//! are reused by insertion.

/// Probe increment is 1 (linear probing); distances are measured modulo
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Tombstone,
    Filled,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: SlotState,
    key: u64,
    value: u64,
}

impl Slot {
    const EMPTY: Slot = Slot {
        state: SlotState::Empty,
        key: 0,
        value: 0,
    };
}

#[derive(Debug, Clone)]
pub struct IntMap {
    slots: Vec<Slot>,
    /// Filled slots; tombstones are not counted.
    len: usize,
    mask: u64,
    /// Set once any tombstone slot has been refilled. A refilled element may
    /// sit closer to its home than Robin-Hood displacement would have left
    /// it, which invalidates the probe-distance early exit until the next
    /// rehash rebuilds pure chains.
    reused: bool,
}

const INITIAL_CAPACITY: usize = 8;

/// 64-bit bijective mixer: xor-shift, two odd multipliers, final xor-shift.
#[inline]
fn hash(mut k: u64) -> u64 {
    k = (k ^ (k >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    k = (k ^ (k >> 27)).wrapping_mul(0x94d049bb133111eb);
    k ^ (k >> 31)
}

impl IntMap {
    pub fn new() -> Self {
        IntMap {
            slots: vec![Slot::EMPTY; INITIAL_CAPACITY],
            len: 0,
            mask: (INITIAL_CAPACITY - 1) as u64,
            reused: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn home(&self, key: u64) -> u64 {
        hash(key) & self.mask
    }

    /// Probe distance of slot `i` for an element whose home slot is `home`.
    #[inline]
    fn distance(&self, i: u64, home: u64) -> u64 {
        (i.wrapping_sub(home)) & self.mask
    }

    /// Upsert. Overwrites in place when the key is present; otherwise inserts
    /// per Robin-Hood, reusing the first tombstone it is entitled to. May
    /// grow the table when the load bound `len <= 5 * capacity / 8` would be
    /// exceeded.
    pub fn emplace(&mut self, key: u64, value: u64) {
        if (self.len + 1) * 8 > self.capacity() * 5 {
            self.grow();
        }

        // Upsert probe first: an existing key may live beyond a tombstone,
        // and it must be overwritten rather than shadowed.
        if let Some(i) = self.probe(key) {
            self.slots[i as usize].value = value;
            return;
        }

        let home = self.home(key);
        let mut i = home;
        let mut dist = 0u64;
        let (mut key, mut value) = (key, value);
        loop {
            let slot = self.slots[i as usize];
            match slot.state {
                SlotState::Empty | SlotState::Tombstone => {
                    self.reused |= slot.state == SlotState::Tombstone;
                    self.slots[i as usize] = Slot {
                        state: SlotState::Filled,
                        key,
                        value,
                    };
                    self.len += 1;
                    return;
                }
                SlotState::Filled => {
                    let other_dist = self.distance(i, self.home(slot.key));
                    if other_dist < dist {
                        // Rob the richer resident: it moves on with our probe
                        // position, we keep its (shorter) distance.
                        self.slots[i as usize].key = key;
                        self.slots[i as usize].value = value;
                        key = slot.key;
                        value = slot.value;
                        dist = other_dist;
                    }
                }
            }
            i = (i + 1) & self.mask;
            dist += 1;
        }
    }

    /// Index of the filled slot holding `key`, if present. Probing stops at
    /// `Empty`, or early when a filled occupant is closer to its home than
    /// the searcher is to its own (the Robin-Hood exit; sound only while no
    /// tombstone has been refilled). Tombstones never stop the probe.
    #[inline]
    fn probe(&self, key: u64) -> Option<u64> {
        let home = self.home(key);
        let mut i = home;
        let mut dist = 0u64;
        // A probe that wraps all the way around (possible when every slot is
        // a tombstone) means the key is absent.
        while dist < self.slots.len() as u64 {
            let slot = self.slots[i as usize];
            match slot.state {
                SlotState::Empty => return None,
                SlotState::Filled => {
                    if slot.key == key {
                        return Some(i);
                    }
                    if !self.reused && self.distance(i, self.home(slot.key)) < dist {
                        return None;
                    }
                }
                SlotState::Tombstone => {}
            }
            i = (i + 1) & self.mask;
            dist += 1;
        }
        None
    }

    pub fn find(&self, key: u64) -> Option<u64> {
        self.probe(key).map(|i| self.slots[i as usize].value)
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.probe(key).is_some()
    }

    /// Marks the key's slot as a tombstone; no-op when absent.
    pub fn erase(&mut self, key: u64) {
        if let Some(i) = self.probe(key) {
            self.slots[i as usize].state = SlotState::Tombstone;
            self.len -= 1;
        }
    }

    /// Rehash into a table 4x the size, dropping tombstones. The rebuilt
    /// chains are pure Robin-Hood, so the early exit is sound again.
    fn grow(&mut self) {
        let new_capacity = self.capacity() * 4;
        let old = std::mem::replace(&mut self.slots, vec![Slot::EMPTY; new_capacity]);
        self.mask = (self.slots.len() - 1) as u64;
        self.len = 0;
        self.reused = false;
        for slot in old {
            if slot.state == SlotState::Filled {
                self.emplace(slot.key, slot.value);
            }
        }
    }

    /// Iterate over `(key, value)` pairs of filled slots, in unspecified
    /// order. Invalidated by any mutation.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: &self.slots,
            pos: 0,
        }
    }

    /// Maximum probe distance over all filled slots; exposed for the
    /// Robin-Hood invariant checks.
    pub fn max_probe_distance(&self) -> u64 {
        let mut max = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.state == SlotState::Filled {
                max = max.max(self.distance(i as u64, self.home(slot.key)));
            }
        }
        max
    }
}

impl Default for IntMap {
    fn default() -> Self {
        IntMap::new()
    }
}

pub struct Iter<'a> {
    slots: &'a [Slot],
    pos: usize,
}

impl Iterator for Iter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        while self.pos < self.slots.len() {
            let slot = self.slots[self.pos];
            self.pos += 1;
            if slot.state == SlotState::Filled {
                return Some((slot.key, slot.value));
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a IntMap {
    type Item = (u64, u64);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
