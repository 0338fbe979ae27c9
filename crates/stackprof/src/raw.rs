//! Chronological log of captured stacks with per-sample timing.

use crate::frame::FrameId;
use crate::rle::{Run, RunLengthLog};

/// When a sample was taken and how long after the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub timestamp: u64,
    pub delta: u64,
}

/// Flattened raw output: `[len, frame ids outermost-first..., repeat, ...]`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawDrain {
    pub raw: Vec<u64>,
    pub timestamps: Vec<u64>,
    pub deltas: Vec<u64>,
}

/// Run-length log of stacks. Stacks are stored innermost-first, as captured.
#[derive(Debug, Default)]
pub struct RawTrace {
    stacks: RunLengthLog<Box<[FrameId]>>,
    timestamps: Vec<u64>,
    deltas: Vec<u64>,
}

impl RawTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, stack: &[FrameId], timing: SampleTiming) {
        self.stacks
            .push_with(|tail| tail.as_ref() == stack, || stack.into());
        self.timestamps.push(timing.timestamp);
        self.deltas.push(timing.delta);
    }

    pub fn runs(&self) -> &[Run<Box<[FrameId]>>] {
        self.stacks.runs()
    }

    pub fn sample_count(&self) -> u64 {
        self.stacks.total()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn drain(&mut self) -> RawDrain {
        let runs = self.stacks.take();
        let words: usize = runs.iter().map(|r| r.value.len() + 2).sum();
        let mut raw = Vec::with_capacity(words);
        for run in runs {
            raw.push(run.value.len() as u64);
            raw.extend(run.value.iter().rev().map(|f| f.get()));
            raw.push(run.repeat);
        }
        RawDrain {
            raw,
            timestamps: std::mem::take(&mut self.timestamps),
            deltas: std::mem::take(&mut self.deltas),
        }
    }
}

/// Decode a flattened raw log into `(frames outermost-first, repeat)` runs.
///
/// Returns `None` if the log is truncated.
pub fn decode_runs(raw: &[u64]) -> Option<Vec<(Vec<FrameId>, u64)>> {
    let mut runs = Vec::new();
    let mut rest = raw;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::try_from(len).ok()?;
        if tail.len() <= len {
            return None;
        }
        let frames = tail[..len].iter().copied().map(FrameId::new).collect();
        runs.push((frames, tail[len]));
        rest = &tail[len + 1..];
    }
    Some(runs)
}

/// Decode a flattened raw log into one innermost-first stack per sample.
pub fn expand(raw: &[u64]) -> Option<Vec<Vec<FrameId>>> {
    let mut samples = Vec::new();
    for (mut stack, repeat) in decode_runs(raw)? {
        stack.reverse();
        for _ in 0..repeat {
            samples.push(stack.clone());
        }
    }
    Some(samples)
}
