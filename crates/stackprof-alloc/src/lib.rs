//! Allocation hook for stackprof.
//!
//! This crate provides the allocation event source behind stackprof's
//! allocation-count (`object`) sampling mode:
//! - **ProfilingAllocator**: a `GlobalAlloc` over the C allocator that invokes
//!   a registered hook after every successful allocation
//! - **Hook registry**: a single process-wide hook slot, installed and removed
//!   by the profiler when an object-mode session starts and stops
//!
//! # Usage
//!
//! Install the allocator once in the binary:
//! ```rust,ignore
//! stackprof_alloc::allocator!();
//! ```
//!
//! With no hook registered the allocator is a plain passthrough to `malloc`.
//!
//! The hook runs inside the allocator. It must not allocate, and it is never
//! re-entered: allocations made while a hook call is in progress on any thread
//! are not reported.

#![no_std]

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Signature of an allocation hook.
pub type AllocationHook = fn();

/// Registered hook as a function address (0 = none)
static HOOK: AtomicUsize = AtomicUsize::new(0);

/// Set while a hook call is in progress
static IN_HOOK: AtomicBool = AtomicBool::new(false);

/// Register `hook` to run after every allocation, replacing any previous hook.
pub fn set_hook(hook: AllocationHook) {
    HOOK.store(hook as usize, Ordering::Release);
}

/// Remove the registered hook.
///
/// Returns once no hook call is in flight, so the caller may tear down state
/// the hook touches.
pub fn clear_hook() {
    HOOK.store(0, Ordering::Release);
    while IN_HOOK.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
}

/// Drop the hook without waiting for in-flight calls.
///
/// Only for a freshly forked child, where the thread that was running the
/// hook no longer exists.
pub fn reset_after_fork() {
    HOOK.store(0, Ordering::Release);
    IN_HOOK.store(false, Ordering::Release);
}

/// Whether a hook is currently registered.
pub fn hook_installed() -> bool {
    HOOK.load(Ordering::Acquire) != 0
}

#[inline]
fn notify() {
    let addr = HOOK.load(Ordering::Acquire);
    if addr == 0 {
        return;
    }

    // Prevent reentrant calls
    if IN_HOOK.swap(true, Ordering::AcqRel) {
        return;
    }

    // Re-check under the flag so clear_hook() never races a late call
    let addr = HOOK.load(Ordering::Acquire);
    if addr != 0 {
        // SAFETY: only values produced from `AllocationHook` are ever stored.
        let hook: AllocationHook = unsafe { core::mem::transmute::<usize, AllocationHook>(addr) };
        hook();
    }

    IN_HOOK.store(false, Ordering::Release);
}

/// An allocator that wraps the C allocator and reports each allocation.
pub struct ProfilingAllocator;

impl ProfilingAllocator {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ProfilingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// malloc only guarantees alignment for fundamental types
const MIN_ALIGN: usize = 16;

#[inline]
unsafe fn raw_alloc(layout: Layout, zeroed: bool) -> *mut u8 {
    if layout.align() <= MIN_ALIGN && layout.align() <= layout.size() {
        unsafe {
            if zeroed {
                libc::calloc(1, layout.size()) as *mut u8
            } else {
                libc::malloc(layout.size()) as *mut u8
            }
        }
    } else {
        let mut out: *mut libc::c_void = core::ptr::null_mut();
        let align = layout.align().max(core::mem::size_of::<usize>());
        let ret = unsafe { libc::posix_memalign(&mut out, align, layout.size()) };
        if ret != 0 {
            return core::ptr::null_mut();
        }
        if zeroed {
            unsafe { core::ptr::write_bytes(out as *mut u8, 0, layout.size()) };
        }
        out as *mut u8
    }
}

unsafe impl GlobalAlloc for ProfilingAllocator {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { raw_alloc(layout, false) };
        if !ptr.is_null() {
            notify();
        }
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { libc::free(ptr as *mut libc::c_void) }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= MIN_ALIGN && layout.align() <= new_size {
            let new_ptr = unsafe { libc::realloc(ptr as *mut libc::c_void, new_size) as *mut u8 };
            if !new_ptr.is_null() {
                notify();
            }
            new_ptr
        } else {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            let new_ptr = unsafe { raw_alloc(new_layout, false) };
            if !new_ptr.is_null() {
                let copy = layout.size().min(new_size);
                unsafe {
                    core::ptr::copy_nonoverlapping(ptr, new_ptr, copy);
                    libc::free(ptr as *mut libc::c_void);
                }
                notify();
            }
            new_ptr
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { raw_alloc(layout, true) };
        if !ptr.is_null() {
            notify();
        }
        ptr
    }
}

/// Install [`ProfilingAllocator`] as the global allocator.
///
/// ```rust,ignore
/// stackprof_alloc::allocator!();
/// ```
#[macro_export]
macro_rules! allocator {
    () => {
        #[global_allocator]
        static __STACKPROF_ALLOC: $crate::ProfilingAllocator = $crate::ProfilingAllocator::new();
    };
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::sync::atomic::AtomicU64;

    static CALLS: AtomicU64 = AtomicU64::new(0);

    fn count() {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_hook_runs_per_allocation() {
        let alloc = ProfilingAllocator::new();
        set_hook(count);
        let before = CALLS.load(Ordering::Relaxed);
        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let p = alloc.alloc(layout);
            assert!(!p.is_null());
            let q = alloc.alloc_zeroed(layout);
            assert!(!q.is_null());
            assert_eq!(*q, 0);
            alloc.dealloc(p, layout);
            alloc.dealloc(q, layout);
        }
        clear_hook();
        assert!(CALLS.load(Ordering::Relaxed) >= before + 2);
        assert!(!hook_installed());
    }

    #[test]
    fn test_over_aligned_allocation() {
        let alloc = ProfilingAllocator::new();
        unsafe {
            let layout = Layout::from_size_align(32, 256).unwrap();
            let p = alloc.alloc(layout);
            assert!(!p.is_null());
            assert_eq!(p as usize % 256, 0);
            let p = alloc.realloc(p, layout, 512);
            assert_eq!(p as usize % 256, 0);
            alloc.dealloc(p, Layout::from_size_align(512, 256).unwrap());
        }
    }
}
