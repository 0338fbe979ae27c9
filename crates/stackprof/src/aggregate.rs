//! Per-frame aggregation of captured stacks.

use crate::frame::{FrameId, FrameStats};
use std::collections::HashMap;

/// Frame identity -> accumulated statistics.
#[derive(Debug, Default)]
pub struct FrameTable {
    frames: HashMap<FrameId, FrameStats>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stack into the table.
    ///
    /// `frames` is innermost-first and `lines[i]` is the line executing in
    /// `frames[i]` (0 = unknown). `sample_number` must be unique per recorded
    /// sample so recursive frames count once towards `total_samples`.
    pub fn record(&mut self, sample_number: u64, frames: &[FrameId], lines: &[u32], aggregate: bool) {
        let mut prev: Option<FrameId> = None;

        for (i, &frame) in frames.iter().enumerate() {
            let line = lines.get(i).copied().unwrap_or(0);
            let stats = self.frames.entry(frame).or_default();

            if stats.seen_at_sample != sample_number {
                stats.total_samples += 1;
            }
            stats.seen_at_sample = sample_number;

            match prev {
                None => stats.caller_samples += 1,
                Some(callee) if aggregate => stats.add_edge(callee),
                Some(_) => {}
            }

            if aggregate && line > 0 {
                stats.add_line(line, i == 0);
            }

            prev = Some(frame);
        }
    }

    pub fn get(&self, frame: FrameId) -> Option<&FrameStats> {
        self.frames.get(&frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sum of leaf counts across all frames
    pub fn leaf_total(&self) -> u64 {
        self.frames.values().map(|s| s.caller_samples).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &FrameStats)> {
        self.frames.iter().map(|(id, stats)| (*id, stats))
    }

    pub fn into_frames(self) -> HashMap<FrameId, FrameStats> {
        self.frames
    }
}
