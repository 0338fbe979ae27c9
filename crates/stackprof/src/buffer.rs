//! Single-slot staging area between capture and record.
//!
//! Capture runs in interrupt context and only writes into memory allocated
//! when the profiler was created. The `occupied` flag hands the slot from the
//! capturing side to the recording side: capture writes only while it is
//! clear, record reads only while it is set.

use crate::config::{MAX_TAGS, TagKey};
use crate::frame::FrameId;
use crate::host::{Host, TagLookup, WalkOrigin};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Frames captured per sample
pub const MAX_STACK_DEPTH: usize = 2048;
/// Bytes kept per tag value
pub const TAG_VALUE_CAPACITY: usize = 128;

#[derive(Clone, Copy)]
struct TagSlot {
    present: bool,
    len: usize,
    bytes: [u8; TAG_VALUE_CAPACITY],
}

impl TagSlot {
    const EMPTY: TagSlot = TagSlot {
        present: false,
        len: 0,
        bytes: [0; TAG_VALUE_CAPACITY],
    };

    fn value(&self) -> Option<&str> {
        if !self.present {
            return None;
        }
        let bytes = &self.bytes[..self.len];
        // A truncated value may end mid-character
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s),
            Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        }
    }
}

/// Tag values copied at capture time, one slot per configured key
pub struct TagSnapshot {
    slots: [TagSlot; MAX_TAGS],
    count: usize,
}

impl TagSnapshot {
    fn empty() -> Self {
        TagSnapshot {
            slots: [TagSlot::EMPTY; MAX_TAGS],
            count: 0,
        }
    }

    /// Copy the values for `keys` out of the host. Interrupt-safe.
    ///
    /// When the host reports its tag storage unavailable, user tags are
    /// dropped for this sample and only `thread_id` is kept.
    pub(crate) fn capture(&mut self, host: &dyn Host, keys: &[TagKey]) {
        self.count = keys.len().min(MAX_TAGS);
        let mut user_tags_ok = true;

        for (slot, key) in self.slots.iter_mut().zip(keys) {
            slot.present = false;
            slot.len = 0;
            match key {
                TagKey::ThreadId => {
                    slot.len = write_decimal(host.thread_id(), &mut slot.bytes);
                    slot.present = true;
                }
                TagKey::Named(_) if !user_tags_ok => {}
                TagKey::Named(name) => match host.read_tag(name, &mut slot.bytes) {
                    TagLookup::Value(len) => {
                        slot.len = len.min(TAG_VALUE_CAPACITY);
                        slot.present = true;
                    }
                    TagLookup::Missing => {}
                    TagLookup::Unavailable => user_tags_ok = false,
                },
            }
        }

        if !user_tags_ok {
            for (slot, key) in self.slots.iter_mut().zip(keys) {
                if matches!(key, TagKey::Named(_)) {
                    slot.present = false;
                }
            }
        }
    }

    /// Present `(key, value)` pairs in configured key order
    pub fn pairs<'a>(&'a self, keys: &'a [TagKey]) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.slots[..self.count]
            .iter()
            .zip(keys)
            .filter_map(|(slot, key)| slot.value().map(|v| (key.as_str(), v)))
    }
}

/// Format `n` as ASCII decimal without allocating. Returns bytes written.
fn write_decimal(mut n: u64, out: &mut [u8]) -> usize {
    let mut digits = [0u8; 20];
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    let len = (digits.len() - i).min(out.len());
    out[..len].copy_from_slice(&digits[i..i + len]);
    len
}

/// One captured, not yet recorded sample
pub struct CapturedSample {
    pub depth: usize,
    pub frames: [FrameId; MAX_STACK_DEPTH],
    pub lines: [u32; MAX_STACK_DEPTH],
    pub timestamp: u64,
    pub tags: TagSnapshot,
}

impl CapturedSample {
    fn empty() -> Box<Self> {
        Box::new(CapturedSample {
            depth: 0,
            frames: [FrameId::GC; MAX_STACK_DEPTH],
            lines: [0; MAX_STACK_DEPTH],
            timestamp: 0,
            tags: TagSnapshot::empty(),
        })
    }

    pub fn stack(&self) -> &[FrameId] {
        &self.frames[..self.depth]
    }

    pub fn stack_lines(&self) -> &[u32] {
        &self.lines[..self.depth]
    }

    /// Walk the stack and stamp the sample. Interrupt-safe.
    pub(crate) fn capture(&mut self, host: &dyn Host, origin: WalkOrigin, keys: &[TagKey]) {
        let depth = host.walk_stack(origin, &mut self.frames, &mut self.lines);
        self.depth = depth.min(MAX_STACK_DEPTH);
        self.timestamp = host.now_micros();
        if !keys.is_empty() {
            self.tags.capture(host, keys);
        }
    }
}

pub struct SampleBuffer {
    occupied: AtomicBool,
    slot: UnsafeCell<Box<CapturedSample>>,
}

// SAFETY: the occupied flag gives exclusive access to the slot to either the
// filling side or the consuming side. Each side is serialized by its caller:
// fills by the handler guard, consumes by the session lock.
unsafe impl Sync for SampleBuffer {}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBuffer {
    pub fn new() -> Self {
        SampleBuffer {
            occupied: AtomicBool::new(false),
            slot: UnsafeCell::new(CapturedSample::empty()),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    /// Fill the slot if it is free. Returns false, leaving the slot alone,
    /// when a previous sample is still waiting to be recorded.
    ///
    /// Callers must not fill concurrently with each other.
    pub(crate) fn try_fill(&self, fill: impl FnOnce(&mut CapturedSample)) -> bool {
        if self.occupied.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: the slot is free, so the consumer is not reading it, and
        // fills are serialized by the caller.
        let slot = unsafe { &mut *self.slot.get() };
        fill(slot);
        self.occupied.store(true, Ordering::Release);
        true
    }

    /// Timestamp of the waiting sample, if any
    pub(crate) fn pending_timestamp(&self) -> Option<u64> {
        if !self.is_occupied() {
            return None;
        }
        // SAFETY: occupied, so the filling side will not write until cleared
        Some(unsafe { (*self.slot.get()).timestamp })
    }

    /// Hand the waiting sample to `record` and free the slot.
    ///
    /// Callers must not consume concurrently with each other.
    pub(crate) fn consume<R>(&self, record: impl FnOnce(&CapturedSample) -> R) -> Option<R> {
        if !self.is_occupied() {
            return None;
        }
        // SAFETY: occupied, so the filling side will not write until cleared
        let slot = unsafe { &*self.slot.get() };
        let out = record(slot);
        self.occupied.store(false, Ordering::Release);
        Some(out)
    }
}
