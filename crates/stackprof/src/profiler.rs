//! Control surface: start, stop, sample, results.

use crate::config::{Mode, Options};
use crate::deferred::{Recorder, WakePipe};
use crate::error::{Error, Result};
use crate::host::{Host, WalkOrigin};
use crate::native::NativeHost;
use crate::results::Results;
use crate::session::Shared;
use crate::sink::{self, ResultsSink};
use crate::timer;
use crate::trigger::{self, Trigger};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// A sampling profiler over one [`Host`].
///
/// Only one profiler may be running per process. Stopping keeps the
/// accumulated profile, so a later start continues it; [`results`] drains it.
///
/// [`results`]: Profiler::results
pub struct Profiler {
    shared: Arc<Shared>,
    mode: Option<Mode>,
    recorder: Option<Recorder>,
}

impl Profiler {
    pub fn new<H: Host>(host: H) -> Self {
        Profiler {
            shared: Arc::new(Shared::new(Box::new(host))),
            mode: None,
            recorder: None,
        }
    }

    /// A profiler for the current process, resolving frames from its own
    /// debug info.
    pub fn native() -> Result<Self> {
        Ok(Self::new(NativeHost::new()?))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start sampling. Returns `Ok(false)` if already running.
    pub fn start(&mut self, options: &Options) -> Result<bool> {
        if self.is_running() {
            return Ok(false);
        }
        let config = options.validate()?;
        self.forget_orphaned_recorder();

        let wake = match config.mode {
            Mode::Custom => None,
            _ => Some(Arc::new(WakePipe::new()?)),
        };
        let trigger = Box::new(Trigger::new(self.shared.clone(), &config, wake.clone()));
        if trigger::publish(trigger).is_err() {
            return Err(Error::SessionActive);
        }

        let mode = config.mode;
        let interval = config.interval;
        {
            let mut session = self.shared.lock_session();
            self.shared.run_deferred_locked(&mut session);
            let now = self.shared.host.now_micros();
            if session.begin(config, now) {
                self.shared.reset_counters();
                trigger::take_contended();
                debug!("Starting new {} profile", mode);
            } else {
                debug!("Resuming {} profile", mode);
            }
        }

        self.shared.host.prepare_thread();
        if let Some(wake) = wake {
            match Recorder::spawn(self.shared.clone(), wake) {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => {
                    trigger::retract(&self.shared);
                    return Err(e);
                }
            }
        }

        self.shared.running.store(true, Ordering::Release);
        self.mode = Some(mode);

        let armed = match (mode, interval) {
            (Mode::Wall | Mode::Cpu, Some(interval)) => timer::install(mode, interval),
            (Mode::Object, _) => {
                stackprof_alloc::set_hook(trigger::on_allocation);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = armed {
            self.stop();
            return Err(e);
        }

        timer::register_fork_hooks();
        debug!("Profiler started (mode={}, interval={:?})", mode, interval);
        Ok(true)
    }

    /// Stop sampling, recording any sample still buffered. Returns false if
    /// not running.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.shared.running.store(false, Ordering::Release);

        match self.mode {
            Some(mode @ (Mode::Wall | Mode::Cpu)) => {
                if let Err(e) = timer::uninstall(mode) {
                    warn!("Failed to stop {} timer: {}", mode, e);
                }
            }
            Some(Mode::Object) => stackprof_alloc::clear_hook(),
            _ => {}
        }

        trigger::retract(&self.shared);
        if let Some(recorder) = self.recorder.take() {
            recorder.shutdown();
        }
        self.shared.run_deferred();

        debug!("Profiler stopped");
        true
    }

    /// Take one sample now, recording it before returning.
    ///
    /// Returns false if not running.
    pub fn sample(&self) -> bool {
        if !trigger::interrupt(&self.shared, WalkOrigin::Here) {
            return false;
        }
        self.shared.run_deferred();
        true
    }

    /// Count a trigger and capture into the buffer without recording.
    ///
    /// This is the entry point for trigger sources the host drives itself.
    /// It is interrupt-safe whenever the host's capture methods are.
    pub fn interrupt(&self) -> bool {
        trigger::interrupt(&self.shared, WalkOrigin::Here)
    }

    /// Record whatever triggers left in the buffer. For hosts that drain at
    /// their own safepoints.
    pub fn run_deferred(&self) {
        self.shared.run_deferred();
    }

    /// Drain the accumulated profile. `None` while running or if nothing was
    /// recorded since the last drain.
    pub fn results(&mut self) -> Option<Results> {
        if self.is_running() {
            return None;
        }
        let mut session = self.shared.lock_session();
        self.shared.run_deferred_locked(&mut session);
        if session.is_empty() {
            return None;
        }
        let signals = self.shared.signals.swap(0, Ordering::Relaxed) + trigger::take_contended();
        self.shared.allocations.store(0, Ordering::Relaxed);
        session.drain(&*self.shared.host, signals)
    }

    /// Drain into `out`, or into the destination given at start.
    ///
    /// Returns the path written, or `None` if there was nothing to drain.
    pub fn write_results(&mut self, out: Option<&Path>) -> Result<Option<PathBuf>> {
        Ok(self.save_results(out)?.map(|(path, _)| path))
    }

    /// Like [`write_results`](Profiler::write_results), also handing back
    /// the drained results.
    pub fn save_results(&mut self, out: Option<&Path>) -> Result<Option<(PathBuf, Results)>> {
        let path = match out {
            Some(path) => path.to_path_buf(),
            None => self
                .shared
                .lock_session()
                .config()
                .and_then(|c| c.out.clone())
                .ok_or(Error::NoOutput)?,
        };
        let Some(results) = self.results() else {
            return Ok(None);
        };
        sink::write_path(&path, &results)?;
        debug!("Wrote results to {}", path.display());
        Ok(Some((path, results)))
    }

    /// Drain into a caller-supplied sink. Returns false if there was nothing
    /// to drain.
    pub fn write_results_to(&mut self, sink: &mut dyn ResultsSink) -> Result<bool> {
        match self.results() {
            Some(results) => {
                sink.write(&results)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Profile `f` and return what it recorded.
    ///
    /// Sampling stops even if `f` panics.
    pub fn run<R>(&mut self, options: &Options, f: impl FnOnce() -> R) -> Result<(R, Option<Results>)> {
        struct StopOnDrop<'a>(&'a mut Profiler);
        impl Drop for StopOnDrop<'_> {
            fn drop(&mut self) {
                self.0.stop();
            }
        }

        self.start(options)?;
        let value = {
            let _stop = StopOnDrop(self);
            f()
        };
        Ok((value, self.results()))
    }

    fn forget_orphaned_recorder(&mut self) {
        if self.shared.orphaned.swap(false, Ordering::AcqRel) {
            // The thread did not survive the fork; joining it would hang
            if let Some(recorder) = self.recorder.take() {
                std::mem::forget(recorder);
            }
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if self.shared.orphaned.load(Ordering::Acquire) {
            self.forget_orphaned_recorder();
            return;
        }
        self.stop();
    }
}
