//! Interval timers and the profiling signal handler.

use crate::config::Mode;
use crate::error::{Error, Result};
use crate::native;
use crate::trigger;
use log::warn;
use std::sync::Once;

fn signal_for(mode: Mode) -> Result<libc::c_int> {
    match mode {
        Mode::Wall => Ok(libc::SIGALRM),
        Mode::Cpu => Ok(libc::SIGPROF),
        other => Err(Error::UnsupportedMode(other.to_string())),
    }
}

fn timer_for(mode: Mode) -> Result<libc::c_int> {
    match mode {
        Mode::Wall => Ok(libc::ITIMER_REAL),
        Mode::Cpu => Ok(libc::ITIMER_PROF),
        other => Err(Error::UnsupportedMode(other.to_string())),
    }
}

extern "C" fn profiling_signal_handler(
    signal: libc::c_int,
    _info: *mut libc::siginfo_t,
    ucontext: *mut libc::c_void,
) {
    // SAFETY: errno is thread-local; restored so the interrupted code never
    // sees it change
    let saved_errno = unsafe { *libc::__errno_location() };
    let origin = native::interrupted_origin(ucontext);
    trigger::on_timer_signal(signal, origin);
    unsafe { *libc::__errno_location() = saved_errno };
}

/// Install the handler and start the timer for `mode`.
pub(crate) fn install(mode: Mode, interval_us: u64) -> Result<()> {
    let signal = signal_for(mode)?;
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = profiling_signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);

        if libc::sigaction(signal, &sa, std::ptr::null_mut()) < 0 {
            return Err(Error::Timer(format!(
                "sigaction failed: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    arm(mode, interval_us)
}

/// Stop the timer for `mode` and ignore any signal still in flight.
pub(crate) fn uninstall(mode: Mode) -> Result<()> {
    disarm(mode)?;
    let signal = signal_for(mode)?;
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(signal, &sa, std::ptr::null_mut()) < 0 {
            return Err(Error::Timer(format!(
                "sigaction failed: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

pub(crate) fn arm(mode: Mode, interval_us: u64) -> Result<()> {
    let period = libc::timeval {
        tv_sec: (interval_us / 1_000_000) as libc::time_t,
        tv_usec: (interval_us % 1_000_000) as libc::suseconds_t,
    };
    set_timer(
        mode,
        libc::itimerval {
            it_interval: period,
            it_value: period,
        },
    )
}

pub(crate) fn disarm(mode: Mode) -> Result<()> {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    set_timer(
        mode,
        libc::itimerval {
            it_interval: zero,
            it_value: zero,
        },
    )
}

fn set_timer(mode: Mode, timer: libc::itimerval) -> Result<()> {
    let which = timer_for(mode)?;
    // SAFETY: `timer` is a valid itimerval; the old value is not requested
    let rc = unsafe { libc::setitimer(which, &timer, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(Error::Timer(format!(
            "setitimer failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

extern "C" fn before_fork() {
    if let Some((mode, _)) = trigger::active_timer() {
        let _ = disarm(mode);
    }
}

extern "C" fn after_fork_parent() {
    if let Some((mode, interval)) = trigger::active_timer()
        && let Err(e) = arm(mode, interval)
    {
        warn!("Failed to re-arm {} timer after fork: {}", mode, e);
    }
}

extern "C" fn after_fork_child() {
    match trigger::abandon_in_child() {
        Some(mode) if mode.uses_timer() => {
            let _ = uninstall(mode);
        }
        Some(Mode::Object) => stackprof_alloc::reset_after_fork(),
        _ => {}
    }
}

/// Register the fork hooks once per process.
pub(crate) fn register_fork_hooks() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        // SAFETY: the hooks are plain functions valid for the process lifetime
        let rc = unsafe {
            libc::pthread_atfork(
                Some(before_fork),
                Some(after_fork_parent),
                Some(after_fork_child),
            )
        };
        if rc != 0 {
            warn!("pthread_atfork failed with {}", rc);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untimed_modes_rejected() {
        assert!(matches!(install(Mode::Custom, 1000), Err(Error::UnsupportedMode(_))));
        assert!(matches!(disarm(Mode::Object), Err(Error::UnsupportedMode(_))));
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(signal_for(Mode::Wall).unwrap(), libc::SIGALRM);
        assert_eq!(signal_for(Mode::Cpu).unwrap(), libc::SIGPROF);
        assert_eq!(timer_for(Mode::Cpu).unwrap(), libc::ITIMER_PROF);
    }
}
