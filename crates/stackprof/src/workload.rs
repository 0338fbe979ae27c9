//! Built-in workloads for `stackprof record`.
//!
//! - Spin: CPU work at varying call depths
//! - Alloc: short-lived allocations from two call sites
//! - Mixed: spin, allocate and sleep, so wall and CPU profiles differ

use std::time::{Duration, Instant};

const DEPTH_PERIOD: f64 = 4.0; // seconds to cycle through depths

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    Spin,
    Alloc,
    Mixed,
}

impl Workload {
    /// One unit of work
    #[inline(never)]
    pub fn tick(self, started: Instant) {
        match self {
            Workload::Spin => spin_at_depth(started),
            Workload::Alloc => allocate_batch(),
            Workload::Mixed => {
                spin_at_depth(started);
                allocate_batch();
                idle();
            }
        }
    }
}

#[inline(never)]
fn spin_at_depth(started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let depth = ((elapsed % DEPTH_PERIOD) as u32) % 4;
    match depth {
        0 => depth_1(),
        1 => depth_2(),
        2 => depth_3(),
        _ => depth_4(),
    }
}

#[inline(never)]
fn depth_1() {
    std::hint::black_box(burn(20_000));
}

#[inline(never)]
fn depth_2() {
    depth_1();
}

#[inline(never)]
fn depth_3() {
    depth_2();
}

#[inline(never)]
fn depth_4() {
    depth_3();
}

/// Busy work that won't be optimized away
#[inline(never)]
pub fn burn(iterations: u32) -> u64 {
    let mut val = 0u64;
    for i in 0..iterations {
        val = val.wrapping_mul(1103515245).wrapping_add(12345 + i as u64);
        val ^= val >> 16;
    }
    val
}

#[inline(never)]
fn allocate_batch() {
    let mut total = 0usize;
    for i in 0..64 {
        total += small_allocation(i).len();
        total += large_allocation(i).capacity();
    }
    std::hint::black_box(total);
}

#[inline(never)]
fn small_allocation(i: usize) -> String {
    format!("item-{i}")
}

#[inline(never)]
fn large_allocation(i: usize) -> Vec<u64> {
    vec![i as u64; 512]
}

#[inline(never)]
fn idle() {
    std::thread::sleep(Duration::from_millis(2));
}
