//! A child forked mid-session must not keep sampling or touch the parent's
//! session.

mod common;

use common::burn_for;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use stackprof::{Mode, Options, Profiler};
use std::time::Duration;

#[test]
fn test_child_stops_parent_continues() {
    let mut profiler = Profiler::native().unwrap();
    profiler
        .start(&Options::new(Mode::Wall).interval(1_000))
        .unwrap();
    burn_for(Duration::from_millis(20));

    // SAFETY: the child only burns CPU, checks state and exits
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let ok = !profiler.is_running();
            burn_for(Duration::from_millis(20));
            std::process::exit(if ok { 0 } else { 1 });
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert_eq!(status, WaitStatus::Exited(child, 0));

            assert!(profiler.is_running());
            burn_for(Duration::from_millis(20));
            profiler.stop();
            assert!(profiler.results().unwrap().samples > 0);
        }
    }
}
