//! The runtime being profiled.
//!
//! A [`Host`] supplies everything the profiler cannot know on its own: how to
//! walk the current stack, whether a garbage collector is running, what the
//! current thread's tag values are and how to name a frame. Everything except
//! [`Host::describe`] and [`Host::prepare_thread`] may be called from an
//! interrupt context and must not allocate, lock, or block.

use crate::frame::FrameId;

/// Where a stack walk begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrigin {
    /// The caller of `walk_stack`
    Here,
    /// The code interrupted by a signal
    Interrupted { pc: u64, fp: u64 },
}

/// Garbage collector activity at the moment of a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPhase {
    #[default]
    Idle,
    Marking,
    Sweeping,
    /// Collecting, in no phase the host distinguishes
    Other,
}

impl GcPhase {
    pub fn is_active(self) -> bool {
        self != GcPhase::Idle
    }
}

/// Outcome of reading one tag value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLookup {
    /// Tag storage could not be read safely; skip tags for this sample
    Unavailable,
    /// The key is not set on this thread
    Missing,
    /// Full length of the value. Only `min(len, out.len())` bytes were written.
    Value(usize),
}

/// Human-readable description of a frame, resolved after sampling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub name: String,
    pub file: String,
    pub line: Option<u32>,
}

impl FrameInfo {
    pub fn unknown(frame: FrameId) -> Self {
        FrameInfo {
            name: format!("0x{:x}", frame.get()),
            file: "<unknown>".to_string(),
            line: None,
        }
    }
}

pub trait Host: Send + Sync + 'static {
    /// Fill `frames`/`lines` innermost-first and return how many were written.
    ///
    /// Must not write past either slice. Identities `0..=2` are reserved.
    fn walk_stack(&self, origin: WalkOrigin, frames: &mut [FrameId], lines: &mut [u32]) -> usize;

    /// Name a frame for results. Called outside interrupt context.
    fn describe(&self, frame: FrameId) -> FrameInfo;

    fn gc_phase(&self) -> GcPhase {
        GcPhase::Idle
    }

    /// Copy the current thread's value for `key` into `out`.
    fn read_tag(&self, _key: &str, _out: &mut [u8]) -> TagLookup {
        TagLookup::Unavailable
    }

    fn thread_id(&self) -> u64 {
        current_thread_id()
    }

    /// Wall clock in microseconds
    fn now_micros(&self) -> u64 {
        realtime_micros()
    }

    /// Called on the starting thread before any trigger is armed.
    fn prepare_thread(&self) {}
}

/// `CLOCK_REALTIME` in microseconds. Async-signal-safe.
pub fn realtime_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime writes only into `ts`
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

/// Kernel thread id of the calling thread. Async-signal-safe.
pub fn current_thread_id() -> u64 {
    // SAFETY: gettid has no preconditions
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}
