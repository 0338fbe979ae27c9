//! Allocation-driven sampling. Needs the profiling allocator installed in
//! this test binary.

use stackprof::{Mode, Options, Profiler};

stackprof_alloc::allocator!();

#[inline(never)]
fn allocate(n: usize) -> usize {
    let mut total = 0;
    for i in 0..n {
        let v = std::hint::black_box(vec![i as u8; 64]);
        total += v.len();
    }
    total
}

#[test]
fn test_every_nth_allocation_is_sampled() {
    let mut profiler = Profiler::native().unwrap();
    let options = Options::new(Mode::Object).interval(10).raw(true);

    let (total, results) = profiler.run(&options, || allocate(1_000)).unwrap();
    assert_eq!(total, 64_000);

    let results = results.unwrap();
    assert_eq!(results.mode, Mode::Object);
    assert_eq!(results.interval, Some(10));
    assert_eq!(results.gc_samples, 0);
    // One trigger per stride of the loop's own allocations; triggers that
    // land while the previous sample is still unrecorded count as missed
    assert!(results.samples > 0);
    assert!(
        results.samples + results.missed_samples >= 100,
        "samples = {}, missed = {}",
        results.samples,
        results.missed_samples
    );
    assert_eq!(results.leaf_total(), results.samples);
    assert!(!stackprof_alloc::hook_installed());
}
