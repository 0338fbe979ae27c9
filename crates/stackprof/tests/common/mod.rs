//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use stackprof::{FrameId, FrameInfo, GcPhase, Host, TagLookup, WalkOrigin};
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const DEPTH: usize = 8;

/// Tests in one binary share the process-wide session
pub fn session_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct Script {
    frames: [AtomicU64; DEPTH],
    depth: AtomicUsize,
    clock: AtomicU64,
    gc_phase: AtomicU8,
    request: AtomicU64,
}

/// Host driven by the test: stack of named functions, a manual clock, a GC
/// switch and a numeric `request` tag.
#[derive(Clone, Default)]
pub struct ScriptedHost {
    script: Arc<Script>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost-first frame ids; each frame's line equals its id
    pub fn set_stack(&self, stack: &[u64]) {
        for (slot, frame) in self.script.frames.iter().zip(stack) {
            slot.store(*frame, Ordering::Relaxed);
        }
        self.script.depth.store(stack.len().min(DEPTH), Ordering::Release);
    }

    pub fn tick(&self, micros: u64) {
        self.script.clock.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn set_gc(&self, phase: GcPhase) {
        let raw = match phase {
            GcPhase::Idle => 0,
            GcPhase::Marking => 1,
            GcPhase::Sweeping => 2,
            GcPhase::Other => 3,
        };
        self.script.gc_phase.store(raw, Ordering::Relaxed);
    }

    /// Zero unsets the tag
    pub fn set_request(&self, id: u64) {
        self.script.request.store(id, Ordering::Relaxed);
    }
}

impl Host for ScriptedHost {
    fn walk_stack(&self, _origin: WalkOrigin, frames: &mut [FrameId], lines: &mut [u32]) -> usize {
        let depth = self.script.depth.load(Ordering::Acquire).min(frames.len());
        for i in 0..depth {
            let id = self.script.frames[i].load(Ordering::Relaxed);
            frames[i] = FrameId::new(id);
            lines[i] = id as u32;
        }
        depth
    }

    fn describe(&self, frame: FrameId) -> FrameInfo {
        FrameInfo {
            name: format!("fn_{:x}", frame.get()),
            file: "scripted.rs".to_string(),
            line: Some(frame.get() as u32),
        }
    }

    fn gc_phase(&self) -> GcPhase {
        match self.script.gc_phase.load(Ordering::Relaxed) {
            1 => GcPhase::Marking,
            2 => GcPhase::Sweeping,
            3 => GcPhase::Other,
            _ => GcPhase::Idle,
        }
    }

    fn read_tag(&self, key: &str, out: &mut [u8]) -> TagLookup {
        if key != "request" {
            return TagLookup::Missing;
        }
        match self.script.request.load(Ordering::Relaxed) {
            0 => TagLookup::Missing,
            id => {
                // Digits only, written without allocating
                let mut digits = [0u8; 20];
                let mut n = id;
                let mut len = 0;
                while n > 0 {
                    digits[len] = b'0' + (n % 10) as u8;
                    n /= 10;
                    len += 1;
                }
                for (i, byte) in digits[..len].iter().rev().enumerate().take(out.len()) {
                    out[i] = *byte;
                }
                TagLookup::Value(len)
            }
        }
    }

    fn thread_id(&self) -> u64 {
        42
    }

    fn now_micros(&self) -> u64 {
        self.script.clock.load(Ordering::Relaxed)
    }
}

/// Busy work the timer can land in
#[inline(never)]
pub fn burn_for(duration: std::time::Duration) -> u64 {
    let started = std::time::Instant::now();
    let mut acc = 0u64;
    while started.elapsed() < duration {
        acc = acc.wrapping_add(stackprof::workload::burn(10_000));
    }
    std::hint::black_box(acc)
}
