//! Frame-pointer stack walking.
//!
//! Requires frames to be built with `-C force-frame-pointers=yes`. A walk only
//! dereferences frame pointers inside the stack range registered for the
//! current thread. On threads that never registered, only the interrupted
//! program counter is reported.

use crate::host::WalkOrigin;
use std::cell::Cell;

thread_local! {
    static STACK_BOUNDS: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
}

/// Record the calling thread's stack range so walks can follow frames on it
pub fn register_current_thread() -> bool {
    match current_stack_range() {
        Some(bounds) => {
            STACK_BOUNDS.with(|b| b.set(bounds));
            true
        }
        None => false,
    }
}

fn registered_bounds() -> Option<(usize, usize)> {
    STACK_BOUNDS
        .try_with(|b| b.get())
        .ok()
        .filter(|(lo, hi)| lo < hi)
}

fn current_stack_range() -> Option<(usize, usize)> {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return None;
        }
        let mut addr: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 || addr.is_null() {
            return None;
        }
        Some((addr as usize, addr as usize + size))
    }
}

/// Program counter and frame pointer saved in a signal context
#[cfg(target_arch = "x86_64")]
pub(crate) fn interrupted_origin(ucontext: *mut libc::c_void) -> WalkOrigin {
    if ucontext.is_null() {
        return WalkOrigin::Here;
    }
    // SAFETY: the kernel passes a valid ucontext_t to SA_SIGINFO handlers
    let gregs = unsafe { &(*(ucontext as *const libc::ucontext_t)).uc_mcontext.gregs };
    WalkOrigin::Interrupted {
        pc: gregs[libc::REG_RIP as usize] as u64,
        fp: gregs[libc::REG_RBP as usize] as u64,
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub(crate) fn interrupted_origin(_ucontext: *mut libc::c_void) -> WalkOrigin {
    WalkOrigin::Here
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn current_frame_pointer() -> usize {
    let fp: usize;
    unsafe {
        core::arch::asm!(
            "mov {}, rbp",
            out(reg) fp,
            options(nomem, nostack, preserves_flags)
        );
    }
    fp
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn current_frame_pointer() -> usize {
    0
}

/// Visit return addresses innermost-first.
///
/// `visit(pc, exact)` returns `false` to stop. `exact` is set only for an
/// interrupted program counter; every other address is a return address.
/// Allocation-free and async-signal-safe.
#[inline(never)]
pub fn walk(origin: WalkOrigin, mut visit: impl FnMut(u64, bool) -> bool) {
    let mut fp = match origin {
        WalkOrigin::Here => current_frame_pointer(),
        WalkOrigin::Interrupted { pc, fp } => {
            if !visit(pc, true) {
                return;
            }
            fp as usize
        }
    };

    let Some((lo, hi)) = registered_bounds() else {
        return;
    };

    while fp != 0 {
        if fp & 0x7 != 0 || fp < lo || fp + 16 > hi {
            break;
        }
        // SAFETY: fp is aligned and the frame record lies in this thread's stack
        let (next_fp, ret_addr) = unsafe {
            let record = fp as *const usize;
            (*record, *record.add(1))
        };
        if ret_addr == 0 {
            break;
        }
        if !visit(ret_addr as u64, false) {
            break;
        }

        if next_fp <= fp {
            break;
        }
        fp = next_fp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_thread_reports_leaf_only() {
        std::thread::spawn(|| {
            let mut seen = Vec::new();
            walk(WalkOrigin::Interrupted { pc: 0x1234, fp: 0 }, |pc, leaf| {
                seen.push((pc, leaf));
                true
            });
            assert_eq!(seen, vec![(0x1234, true)]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_registration_finds_stack() {
        std::thread::spawn(|| {
            assert!(register_current_thread());
            let (lo, hi) = registered_bounds().unwrap();
            let local = 0u8;
            let addr = &local as *const u8 as usize;
            assert!(lo <= addr && addr < hi);
        })
        .join()
        .unwrap();
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_walk_here_visits_callers() {
        std::thread::spawn(|| {
            register_current_thread();
            let mut count = 0;
            walk(WalkOrigin::Here, |pc, _| {
                assert_ne!(pc, 0);
                count += 1;
                count < 64
            });
            assert!(count >= 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_visit_can_stop_early() {
        let mut seen = 0;
        walk(WalkOrigin::Interrupted { pc: 0x10, fp: 0 }, |_, _| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }
}
