//! Synthetic samples for ticks that landed inside a garbage collection.
//!
//! Interrupt context only bumps counters in [`GcPending`]. The deferred step
//! takes them and lays out one synthetic sample per suppressed tick, spaced
//! backward from the end of the pause.

use crate::frame::FrameId;
use crate::host::GcPhase;
use std::sync::atomic::{AtomicU64, Ordering};

const MARKING_STACK: &[FrameId] = &[FrameId::MARKING, FrameId::GC];
const SWEEPING_STACK: &[FrameId] = &[FrameId::SWEEPING, FrameId::GC];
const GC_STACK: &[FrameId] = &[FrameId::GC];

/// Suppressed ticks, written from interrupt context
#[derive(Debug, Default)]
pub struct GcPending {
    total: AtomicU64,
    marking: AtomicU64,
    sweeping: AtomicU64,
    first_tick_at: AtomicU64,
}

/// Counters taken from [`GcPending`] at one deferred run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcTicks {
    pub total: u64,
    pub marking: u64,
    pub sweeping: u64,
    /// Timestamp of the first suppressed tick
    pub first_tick_at: u64,
}

impl GcPending {
    /// Count one suppressed tick. Interrupt-safe.
    pub fn note(&self, phase: GcPhase, now: u64) {
        match phase {
            GcPhase::Marking => {
                self.marking.fetch_add(1, Ordering::Relaxed);
            }
            GcPhase::Sweeping => {
                self.sweeping.fetch_add(1, Ordering::Relaxed);
            }
            GcPhase::Idle | GcPhase::Other => {}
        }
        if self.total.load(Ordering::Acquire) == 0 {
            self.first_tick_at.store(now, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.total.load(Ordering::Acquire) == 0
    }

    /// Take and reset the counters.
    ///
    /// The phase split is best effort against a concurrent `note`: phase
    /// counts are clamped to the total taken.
    pub fn take(&self) -> Option<GcTicks> {
        let total = self.total.swap(0, Ordering::AcqRel);
        if total == 0 {
            return None;
        }
        let first_tick_at = self.first_tick_at.load(Ordering::Relaxed);
        let marking = self.marking.swap(0, Ordering::Relaxed).min(total);
        let sweeping = self.sweeping.swap(0, Ordering::Relaxed).min(total - marking);
        Some(GcTicks {
            total,
            marking,
            sweeping,
            first_tick_at,
        })
    }
}

/// One synthesized sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticSample {
    pub stack: &'static [FrameId],
    pub timestamp: u64,
    pub delta: u64,
}

/// Lays out backfilled samples for one pause
#[derive(Debug, Clone, Copy)]
pub struct GcBackfill {
    pub ticks: GcTicks,
    /// Timestamp of the last recorded sample before the pause
    pub last_sample_at: u64,
    /// End of the pause
    pub end: u64,
    /// Spacing between synthetic samples; `None` spreads them evenly
    /// between `last_sample_at` and `end`
    pub interval: Option<u64>,
}

impl GcBackfill {
    /// Marking samples first, then sweeping, then unphased collection.
    ///
    /// Timestamps never precede `last_sample_at`, never exceed `end`, and
    /// never decrease.
    pub fn samples(&self) -> Vec<SyntheticSample> {
        let n = self.ticks.total;
        let end = self.end.max(self.last_sample_at);
        let spacing = match self.interval {
            Some(interval) => interval,
            None => (end - self.last_sample_at) / n.max(1),
        };

        let plain = n - self.ticks.marking - self.ticks.sweeping;
        let stacks = std::iter::repeat_n(MARKING_STACK, self.ticks.marking as usize)
            .chain(std::iter::repeat_n(SWEEPING_STACK, self.ticks.sweeping as usize))
            .chain(std::iter::repeat_n(GC_STACK, plain as usize));

        let mut prev = self.last_sample_at;
        stacks
            .enumerate()
            .map(|(i, stack)| {
                let back = (n - 1 - i as u64).saturating_mul(spacing);
                let timestamp = end.saturating_sub(back).max(self.last_sample_at);
                let delta = timestamp - prev;
                prev = timestamp;
                SyntheticSample {
                    stack,
                    timestamp,
                    delta,
                }
            })
            .collect()
    }
}
