//! Process-wide trigger slot and the interrupt-context entry points.
//!
//! A started profiler publishes a [`Trigger`] into `ACTIVE`. Interrupt
//! context reaches it only while holding the handler guard, and `retract`
//! waits for the guard to be released before handing the trigger back, so a
//! trigger is never freed under a running handler.

use crate::config::{Config, Mode, TagKey};
use crate::deferred::{self, WakePipe};
use crate::host::WalkOrigin;
use crate::session::Shared;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

static ACTIVE: AtomicPtr<Trigger> = AtomicPtr::new(ptr::null_mut());

/// Held while interrupt-context code runs
static HANDLER_BUSY: AtomicBool = AtomicBool::new(false);

/// Triggers dropped because a previous handler was still running
static CONTENDED: AtomicU64 = AtomicU64::new(0);

/// Immutable view of one start/stop span, shared with interrupt context
pub(crate) struct Trigger {
    pub shared: Arc<Shared>,
    pub mode: Mode,
    pub interval: Option<u64>,
    pub ignore_gc: bool,
    pub tags: Vec<TagKey>,
    /// Thread that called start; wall-clock signals are redirected to it
    pub target: libc::pthread_t,
    pub wake: Option<Arc<WakePipe>>,
}

impl Trigger {
    pub fn new(shared: Arc<Shared>, config: &Config, wake: Option<Arc<WakePipe>>) -> Self {
        Trigger {
            shared,
            mode: config.mode,
            interval: config.interval,
            ignore_gc: config.ignore_gc,
            tags: config.tags.clone(),
            // SAFETY: pthread_self has no preconditions
            target: unsafe { libc::pthread_self() },
            wake,
        }
    }

    /// Count one trigger and capture a sample into the buffer. Interrupt-safe.
    ///
    /// A trigger inside a GC pause only counts a pending backfill tick, and a
    /// trigger that finds the buffer occupied is dropped.
    fn fire(&self, origin: WalkOrigin) -> bool {
        let shared = &*self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return false;
        }
        shared.signals.fetch_add(1, Ordering::Relaxed);

        if !self.ignore_gc {
            let phase = shared.host.gc_phase();
            if phase.is_active() {
                shared.gc.note(phase, shared.host.now_micros());
                self.notify();
                return true;
            }
        }

        let host = &*shared.host;
        if shared
            .buffer
            .try_fill(|slot| slot.capture(host, origin, &self.tags))
        {
            self.notify();
        }
        true
    }

    fn notify(&self) {
        if let Some(wake) = &self.wake {
            wake.notify();
        }
    }

    fn on_allocation(&self) {
        let n = self.shared.allocations.fetch_add(1, Ordering::Relaxed) + 1;
        let stride = self.interval.unwrap_or(1).max(1);
        if n % stride == 0 {
            self.fire(WalkOrigin::Here);
        }
    }
}

struct HandlerGuard;

impl HandlerGuard {
    fn try_acquire() -> Option<Self> {
        if HANDLER_BUSY.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(HandlerGuard)
        }
    }

    /// Spin for the guard. Never call from interrupt context.
    fn acquire() -> Self {
        loop {
            if let Some(guard) = Self::try_acquire() {
                return guard;
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        HANDLER_BUSY.store(false, Ordering::SeqCst);
    }
}

fn with_active<R>(count_contended: bool, f: impl FnOnce(&Trigger) -> R) -> Option<R> {
    let Some(_guard) = HandlerGuard::try_acquire() else {
        if count_contended && !ACTIVE.load(Ordering::SeqCst).is_null() {
            CONTENDED.fetch_add(1, Ordering::Relaxed);
        }
        return None;
    };
    let active = ACTIVE.load(Ordering::SeqCst);
    if active.is_null() {
        return None;
    }
    // SAFETY: non-null under the guard, so retract() has not freed it
    Some(f(unsafe { &*active }))
}

/// Claim the process-wide slot. Gives the trigger back if it is taken.
pub(crate) fn publish(trigger: Box<Trigger>) -> Result<(), Box<Trigger>> {
    let raw = Box::into_raw(trigger);
    match ACTIVE.compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => Ok(()),
        // SAFETY: `raw` came from Box::into_raw above and was never shared
        Err(_) => Err(unsafe { Box::from_raw(raw) }),
    }
}

/// Release the slot if `shared` owns it, once no handler is using it.
pub(crate) fn retract(shared: &Arc<Shared>) -> Option<Box<Trigger>> {
    let current = {
        let _guard = HandlerGuard::acquire();
        let current = ACTIVE.load(Ordering::SeqCst);
        // SAFETY: non-null under the guard
        if current.is_null() || !Arc::ptr_eq(unsafe { &(*current).shared }, shared) {
            return None;
        }
        ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);
        current
    };
    // SAFETY: unpublished while holding the guard, so no handler can still
    // be reading it
    Some(unsafe { Box::from_raw(current) })
}

/// Timer configuration of the active trigger
pub(crate) fn active_timer() -> Option<(Mode, u64)> {
    let _guard = HandlerGuard::acquire();
    let active = ACTIVE.load(Ordering::SeqCst);
    if active.is_null() {
        return None;
    }
    // SAFETY: non-null under the guard
    let trigger = unsafe { &*active };
    if !trigger.mode.uses_timer() || !trigger.shared.running.load(Ordering::Acquire) {
        return None;
    }
    Some((trigger.mode, trigger.interval?))
}

/// Interrupts dropped by the guard since the last call
pub(crate) fn take_contended() -> u64 {
    CONTENDED.swap(0, Ordering::Relaxed)
}

/// Signal handler body for the interval timers.
pub(crate) fn on_timer_signal(signal: libc::c_int, origin: WalkOrigin) {
    let forward_to = with_active(true, |trigger| {
        if !trigger.mode.uses_timer() {
            return None;
        }
        if trigger.mode == Mode::Wall {
            // SAFETY: pthread_self/pthread_equal have no preconditions
            let here = unsafe { libc::pthread_self() };
            if unsafe { libc::pthread_equal(here, trigger.target) } == 0 {
                return Some(trigger.target);
            }
        }
        trigger.fire(origin);
        None
    })
    .flatten();

    // Forwarded after releasing the guard so the target's handler can take it
    if let Some(target) = forward_to {
        // SAFETY: the target is the thread that started the span
        unsafe { libc::pthread_kill(target, signal) };
    }
}

/// Allocation hook for object mode
pub(crate) fn on_allocation() {
    if deferred::in_recorder() {
        return;
    }
    with_active(false, |trigger| {
        if trigger.mode == Mode::Object {
            trigger.on_allocation();
        }
    });
}

/// Trigger for `shared` from ordinary code. Returns whether it was counted.
pub(crate) fn interrupt(shared: &Arc<Shared>, origin: WalkOrigin) -> bool {
    if !shared.running.load(Ordering::Acquire) {
        return false;
    }
    match with_active(true, |trigger| {
        Arc::ptr_eq(&trigger.shared, shared) && trigger.fire(origin)
    }) {
        Some(counted) => counted,
        // Dropped by the guard; it shows up in missed_samples
        None => true,
    }
}

/// Child side of a fork: stop without waiting on anything the parent's other
/// threads may have held.
pub(crate) fn abandon_in_child() -> Option<Mode> {
    HANDLER_BUSY.store(false, Ordering::SeqCst);
    let active = ACTIVE.swap(ptr::null_mut(), Ordering::SeqCst);
    if active.is_null() {
        return None;
    }
    // SAFETY: published and never freed; leaked on purpose in the child
    let trigger = unsafe { &*active };
    trigger.shared.running.store(false, Ordering::Release);
    trigger.shared.orphaned.store(true, Ordering::Release);
    Some(trigger.mode)
}
