//! Deferred-execution queue: interrupt context writes a byte into a pipe and
//! a recorder thread wakes up to record the buffered sample.

use crate::error::{Error, Result};
use crate::session::Shared;
use log::{debug, warn};
use nix::sys::signal::{SigSet, SigmaskHow, Signal, pthread_sigmask};
use std::cell::Cell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

thread_local! {
    static IN_RECORDER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is the recorder. Allocation-free.
pub(crate) fn in_recorder() -> bool {
    IN_RECORDER.with(Cell::get)
}

/// Self-pipe whose write end is safe to use from a signal handler
pub(crate) struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    pub fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe().map_err(|e| Error::Io(e.into()))?;
        for fd in [&read, &write] {
            // SAFETY: fd is a valid descriptor owned by this struct
            unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
        }
        // A full pipe already guarantees a wake-up; never block the writer
        // SAFETY: as above
        let rc = unsafe {
            let flags = libc::fcntl(write.as_raw_fd(), libc::F_GETFL);
            libc::fcntl(write.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK)
        };
        if rc < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(WakePipe { read, write })
    }

    /// Async-signal-safe.
    pub fn notify(&self) {
        let byte = 1u8;
        // SAFETY: writes one byte from a live stack variable
        unsafe {
            libc::write(
                self.write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
    }

    /// Block until notified. Returns false if the pipe is broken.
    fn wait(&self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: reads into a live stack buffer of the given length
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                return true;
            }
            if n == 0 {
                return false;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                warn!("Recorder wake-up pipe failed: {}", err);
                return false;
            }
        }
    }
}

fn block_profiling_signals() {
    let mut set = SigSet::empty();
    set.add(Signal::SIGALRM);
    set.add(Signal::SIGPROF);
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None) {
        warn!("Failed to block profiling signals on recorder thread: {}", e);
    }
}

/// Background thread running the deferred record step
pub(crate) struct Recorder {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<WakePipe>,
}

impl Recorder {
    pub fn spawn(shared: Arc<Shared>, wake: Arc<WakePipe>) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = shutdown.clone();
            let wake = wake.clone();
            std::thread::Builder::new()
                .name("stackprof-recorder".to_string())
                .spawn(move || {
                    block_profiling_signals();
                    IN_RECORDER.with(|flag| flag.set(true));
                    while wake.wait() {
                        shared.run_deferred();
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                    }
                })?
        };
        debug!("Recorder thread started");
        Ok(Recorder {
            handle,
            shutdown,
            wake,
        })
    }

    /// Stop the thread and wait for its last deferred run.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify();
        if self.handle.join().is_err() {
            warn!("Recorder thread panicked");
        }
    }
}
