//! Frame identities and per-frame statistics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque, host-supplied frame identity.
///
/// Values `0..=2` are reserved for the synthetic garbage-collection frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(u64);

impl FrameId {
    /// Inside garbage collection
    pub const GC: FrameId = FrameId(0);
    /// GC marking phase
    pub const MARKING: FrameId = FrameId(1);
    /// GC sweeping phase
    pub const SWEEPING: FrameId = FrameId(2);

    pub const fn new(raw: u64) -> Self {
        FrameId(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_synthetic(self) -> bool {
        self.0 <= Self::SWEEPING.0
    }

    /// Display name of a synthetic frame
    pub fn synthetic_name(self) -> Option<&'static str> {
        match self {
            FrameId::GC => Some("(garbage collection)"),
            FrameId::MARKING => Some("(marking)"),
            FrameId::SWEEPING => Some("(sweeping)"),
            _ => None,
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const HALF_BITS: u32 = u64::BITS / 2;
const LOW_MASK: u64 = (1 << HALF_BITS) - 1;

/// Leaf and total hit counts for one source line, packed into one word.
///
/// The upper half holds the leaf-weighted count and the lower half the
/// total-weighted count, so a sample updates both with a single add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounter(u64);

impl LineCounter {
    /// Counted in both halves
    pub const LEAF_UNIT: u64 = (1 << HALF_BITS) + 1;
    /// Counted in the lower half only
    pub const TOTAL_UNIT: u64 = 1;

    pub fn from_parts(leaf: u32, total: u32) -> Self {
        LineCounter(((leaf as u64) << HALF_BITS) | total as u64)
    }

    pub fn hit(&mut self, leaf: bool) {
        let unit = if leaf { Self::LEAF_UNIT } else { Self::TOTAL_UNIT };
        self.0 = self.0.wrapping_add(unit);
    }

    pub fn leaf(self) -> u64 {
        self.0 >> HALF_BITS
    }

    pub fn total(self) -> u64 {
        self.0 & LOW_MASK
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Accumulated statistics for one frame
#[derive(Debug, Default)]
pub struct FrameStats {
    /// Samples in which this frame appeared anywhere on the stack
    pub total_samples: u64,
    /// Samples in which this frame was the leaf
    pub caller_samples: u64,
    /// Sample number that last counted towards `total_samples` (0 = never)
    pub(crate) seen_at_sample: u64,
    /// Callee identity -> number of times it sat directly inside this frame
    pub edges: Option<HashMap<FrameId, u64>>,
    /// Line number -> packed hit counts
    pub lines: Option<HashMap<u32, LineCounter>>,
}

impl FrameStats {
    pub(crate) fn add_edge(&mut self, callee: FrameId) {
        *self.edges.get_or_insert_with(HashMap::new).entry(callee).or_default() += 1;
    }

    pub(crate) fn add_line(&mut self, line: u32, leaf: bool) {
        self.lines
            .get_or_insert_with(HashMap::new)
            .entry(line)
            .or_default()
            .hit(leaf);
    }

    pub fn edge_total(&self) -> u64 {
        self.edges.as_ref().map_or(0, |e| e.values().sum())
    }
}
