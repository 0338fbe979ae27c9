//! Scripted host and helpers for unit tests.

use crate::frame::FrameId;
use crate::host::{FrameInfo, GcPhase, Host, TagLookup, WalkOrigin};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const DEPTH: usize = 16;

/// Only one session may be active per process, so tests that start one
/// take this lock.
pub fn session_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct Script {
    frames: [AtomicU64; DEPTH],
    lines: [AtomicU32; DEPTH],
    depth: AtomicUsize,
    clock: AtomicU64,
    thread_id: AtomicU64,
    gc_phase: AtomicU8,
    tags_unavailable: AtomicBool,
    tags: Mutex<Vec<(String, String)>>,
    walks: AtomicU64,
}

/// A host whose stack, clock, GC phase and tags are set by the test.
///
/// Clones share one script, so a test can keep a handle after giving the
/// host to a profiler. Stack and clock reads are lock-free.
#[derive(Clone, Default)]
pub struct FakeHost {
    script: Arc<Script>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost-first `(frame, line)` pairs
    pub fn set_stack(&self, stack: &[(u64, u32)]) {
        for (i, (frame, line)) in stack.iter().take(DEPTH).enumerate() {
            self.script.frames[i].store(*frame, Ordering::Relaxed);
            self.script.lines[i].store(*line, Ordering::Relaxed);
        }
        self.script.depth.store(stack.len().min(DEPTH), Ordering::Release);
    }

    pub fn set_clock(&self, micros: u64) {
        self.script.clock.store(micros, Ordering::Relaxed);
    }

    pub fn advance_clock(&self, micros: u64) {
        self.script.clock.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn set_thread_id(&self, id: u64) {
        self.script.thread_id.store(id, Ordering::Relaxed);
    }

    pub fn set_gc_phase(&self, phase: GcPhase) {
        let raw = match phase {
            GcPhase::Idle => 0,
            GcPhase::Marking => 1,
            GcPhase::Sweeping => 2,
            GcPhase::Other => 3,
        };
        self.script.gc_phase.store(raw, Ordering::Relaxed);
    }

    pub fn set_tag(&self, key: &str, value: &str) {
        let mut tags = self.script.tags.lock().unwrap();
        tags.retain(|(k, _)| k != key);
        tags.push((key.to_string(), value.to_string()));
    }

    pub fn set_tags_unavailable(&self, unavailable: bool) {
        self.script.tags_unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of stack walks performed
    pub fn walks(&self) -> u64 {
        self.script.walks.load(Ordering::Relaxed)
    }
}

impl Host for FakeHost {
    fn walk_stack(&self, _origin: WalkOrigin, frames: &mut [FrameId], lines: &mut [u32]) -> usize {
        self.script.walks.fetch_add(1, Ordering::Relaxed);
        let depth = self
            .script
            .depth
            .load(Ordering::Acquire)
            .min(frames.len())
            .min(lines.len());
        for i in 0..depth {
            frames[i] = FrameId::new(self.script.frames[i].load(Ordering::Relaxed));
            lines[i] = self.script.lines[i].load(Ordering::Relaxed);
        }
        depth
    }

    fn describe(&self, frame: FrameId) -> FrameInfo {
        FrameInfo {
            name: format!("frame_{}", frame.get()),
            file: "fake.rs".to_string(),
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
        if self.script.tags_unavailable.load(Ordering::Relaxed) {
            return TagLookup::Unavailable;
        }
        let Ok(tags) = self.script.tags.try_lock() else {
            return TagLookup::Unavailable;
        };
        match tags.iter().find(|(k, _)| k == key) {
            Some((_, value)) => {
                let n = value.len().min(out.len());
                out[..n].copy_from_slice(&value.as_bytes()[..n]);
                TagLookup::Value(value.len())
            }
            None => TagLookup::Missing,
        }
    }

    fn thread_id(&self) -> u64 {
        self.script.thread_id.load(Ordering::Relaxed)
    }

    fn now_micros(&self) -> u64 {
        self.script.clock.load(Ordering::Relaxed)
    }
}
