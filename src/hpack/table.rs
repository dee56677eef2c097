//! Combined static and dynamic HPACK table (RFC 7541 §2.3).
//!
//! The dynamic table is a FIFO: the newest entry sits at index 62 and older
//! entries shift up by one on every insertion. Eviction drops the oldest
//! entries until the new one fits; an entry larger than the whole table
//! empties it and is not stored.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::static_table::{self, LookupResult, STATIC_TABLE};
use crate::error::H2Error;
use crate::http::header::{ENTRY_OVERHEAD, FieldLine, HeaderName};

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// First wire index of the dynamic table.
pub const FIRST_DYNAMIC_INDEX: usize = STATIC_TABLE.len() + 1;

#[derive(Debug, Clone)]
struct DynamicEntry {
    name: HeaderName,
    value: Vec<u8>,
}

impl DynamicEntry {
    fn size(&self) -> usize {
        self.name.as_bytes().len() + self.value.len() + ENTRY_OVERHEAD
    }
}

#[derive(Debug, Clone)]
pub struct HpackTable {
    entries: VecDeque<DynamicEntry>,
    size: usize,
    max_size: usize,
}

impl Default for HpackTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HpackTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Sum of entry sizes currently held.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of dynamic entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a wire index to a field line. Index 0 and anything past the
    /// last dynamic entry are COMPRESSION_ERROR.
    pub fn get(&self, index: usize) -> Result<FieldLine, H2Error> {
        if let Some(entry) = static_table::get(index) {
            return Ok(FieldLine::new(
                HeaderName::from_bytes(entry.name),
                entry.value,
            ));
        }
        let entry = index
            .checked_sub(FIRST_DYNAMIC_INDEX)
            .and_then(|i| self.entries.get(i))
            .ok_or_else(|| H2Error::compression("hpack index out of range"))?;
        Ok(FieldLine::new(entry.name.clone(), entry.value.clone()))
    }

    /// Name only, for literal representations with an indexed name.
    pub fn get_name(&self, index: usize) -> Result<HeaderName, H2Error> {
        if let Some(entry) = static_table::get(index) {
            return Ok(HeaderName::from_bytes(entry.name));
        }
        index
            .checked_sub(FIRST_DYNAMIC_INDEX)
            .and_then(|i| self.entries.get(i))
            .map(|entry| entry.name.clone())
            .ok_or_else(|| H2Error::compression("hpack index out of range"))
    }

    /// Best representation for `(name, value)`: an exact match anywhere
    /// beats a name match, and the static table is searched first.
    pub fn find(&self, name: &HeaderName, value: &[u8]) -> LookupResult {
        let static_result = static_table::lookup(name.as_bytes(), value);
        if let LookupResult::ExactMatch(_) = static_result {
            return static_result;
        }

        let mut dynamic_name = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name.as_bytes() != name.as_bytes() {
                continue;
            }
            if entry.value == value {
                return LookupResult::ExactMatch(FIRST_DYNAMIC_INDEX + i);
            }
            dynamic_name.get_or_insert(FIRST_DYNAMIC_INDEX + i);
        }

        match (static_result, dynamic_name) {
            (LookupResult::NameMatch(i), _) => LookupResult::NameMatch(i),
            (_, Some(i)) => LookupResult::NameMatch(i),
            _ => LookupResult::NotFound,
        }
    }

    /// Add an entry at index 62, evicting from the old end as needed.
    pub fn insert(&mut self, name: HeaderName, value: Vec<u8>) {
        let entry = DynamicEntry { name, value };
        let entry_size = entry.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - entry_size);
        self.size += entry_size;
        self.entries.push_front(entry);
    }

    /// Change the maximum size, evicting until the table fits.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some(old) => self.size -= old.size(),
                None => break,
            }
        }
    }
}
