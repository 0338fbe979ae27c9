//! Interned, run-length compressed per-sample tag records.

use crate::rle::{Run, RunLengthLog};
use std::collections::{BTreeMap, HashMap};

/// Assigns ids to strings in order of first sight, starting at 0
#[derive(Debug, Default)]
pub struct StringTable {
    ids: HashMap<String, u64>,
    strings: Vec<String>,
}

impl StringTable {
    pub fn intern(&mut self, s: &str) -> u64 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.strings.len() as u64;
        self.ids.insert(s.to_string(), id);
        self.strings.push(s.to_string());
        id
    }

    pub fn get(&self, id: u64) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    fn take(&mut self) -> Vec<String> {
        self.ids.clear();
        std::mem::take(&mut self.strings)
    }
}

/// Interned key id -> interned value id for one sample
pub type TagSet = BTreeMap<u64, u64>;

/// Drained tag data: the tag set runs and the string table that resolves them
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagDrain {
    pub sets: Vec<(TagSet, u64)>,
    pub strings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TagCollector {
    strings: StringTable,
    sets: RunLengthLog<TagSet>,
}

impl TagCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the tag set for one sample
    pub fn record<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let set: TagSet = pairs
            .into_iter()
            .map(|(k, v)| (self.strings.intern(k), self.strings.intern(v)))
            .collect();
        self.sets.push(set);
    }

    /// Append an empty tag set, for samples with no tag context
    pub fn record_empty(&mut self) {
        self.sets.push(TagSet::new());
    }

    pub fn runs(&self) -> &[Run<TagSet>] {
        self.sets.runs()
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn drain(&mut self) -> TagDrain {
        TagDrain {
            sets: self
                .sets
                .take()
                .into_iter()
                .map(|run| (run.value, run.repeat))
                .collect(),
            strings: self.strings.take(),
        }
    }
}
