//! Accumulated profile state and the deferred record step.

use crate::aggregate::FrameTable;
use crate::buffer::{CapturedSample, SampleBuffer};
use crate::config::Config;
use crate::frame::FrameId;
use crate::gc::{GcBackfill, GcPending, GcTicks};
use crate::host::{FrameInfo, Host};
use crate::raw::{RawTrace, SampleTiming};
use crate::results::{FrameReport, RESULTS_VERSION, Results};
use crate::tags::TagCollector;
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Everything recorded since the last drain
#[derive(Debug, Default)]
pub(crate) struct Session {
    config: Option<Config>,
    /// `None` until the first start after a drain
    frames: Option<FrameTable>,
    raw: RawTrace,
    tags: TagCollector,
    overall_samples: u64,
    during_gc: u64,
    last_sample_at: u64,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.frames.is_none()
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn overall_samples(&self) -> u64 {
        self.overall_samples
    }

    /// Enter a start/stop span. Returns true if this begins a new profile
    /// rather than continuing a paused one.
    pub fn begin(&mut self, config: Config, now: u64) -> bool {
        let fresh = self.frames.is_none();
        if fresh {
            self.frames = Some(FrameTable::new());
            self.raw = RawTrace::new();
            self.tags = TagCollector::new();
            self.overall_samples = 0;
            self.during_gc = 0;
        }
        self.last_sample_at = now;
        self.config = Some(config);
        fresh
    }

    /// Record one captured sample
    pub fn record_sample(&mut self, sample: &CapturedSample) {
        let timing = self.timing_at(sample.timestamp);
        if !self.record_stack(sample.stack(), sample.stack_lines(), timing) {
            return;
        }
        let Session { config, tags, .. } = self;
        if let Some(config) = config
            && !config.tags.is_empty()
        {
            tags.record(sample.tags.pairs(&config.tags));
        }
    }

    /// Record one synthetic sample per suppressed GC tick, ending at `end`
    pub fn record_backfill(&mut self, ticks: GcTicks, end: u64) {
        let Some(config) = &self.config else {
            return;
        };
        let interval = if config.mode.uses_timer() {
            config.interval
        } else {
            None
        };
        let tagged = !config.tags.is_empty();

        let backfill = GcBackfill {
            ticks,
            last_sample_at: self.last_sample_at,
            end,
            interval,
        };
        for synthetic in backfill.samples() {
            let timing = SampleTiming {
                timestamp: synthetic.timestamp,
                delta: synthetic.delta,
            };
            if !self.record_stack(synthetic.stack, &[], timing) {
                return;
            }
            self.during_gc += 1;
            if tagged {
                self.tags.record_empty();
            }
        }
    }

    /// Timing of a real sample relative to the last one recorded
    fn timing_at(&self, timestamp: u64) -> SampleTiming {
        SampleTiming {
            timestamp,
            delta: timestamp.saturating_sub(self.last_sample_at),
        }
    }

    fn record_stack(&mut self, stack: &[FrameId], lines: &[u32], timing: SampleTiming) -> bool {
        let (Some(config), Some(frames)) = (&self.config, &mut self.frames) else {
            return false;
        };

        self.overall_samples += 1;
        if config.raw {
            self.raw.append(stack, timing);
        }
        frames.record(self.overall_samples, stack, lines, config.aggregate);
        self.last_sample_at = self.last_sample_at.max(timing.timestamp);
        true
    }

    /// Assemble results and reset. `None` when nothing was started since the
    /// last drain.
    pub fn drain(&mut self, host: &dyn Host, signals: u64) -> Option<Results> {
        let table = self.frames.take()?;
        let config = self.config.clone()?;

        let frames = table
            .into_frames()
            .into_iter()
            .map(|(id, stats)| {
                let info = match id.synthetic_name() {
                    Some(name) => FrameInfo {
                        name: name.to_string(),
                        file: String::new(),
                        line: None,
                    },
                    None => host.describe(id),
                };
                let report = FrameReport {
                    name: info.name,
                    file: info.file,
                    line: info.line,
                    total_samples: stats.total_samples,
                    samples: stats.caller_samples,
                    edges: stats.edges.map(|e| e.into_iter().collect()),
                    lines: stats.lines.map(|l| {
                        l.into_iter()
                            .map(|(line, counter)| (line, (counter.total(), counter.leaf())))
                            .collect()
                    }),
                };
                (id, report)
            })
            .collect::<BTreeMap<_, _>>();

        let mut results = Results {
            version: RESULTS_VERSION,
            mode: config.mode,
            interval: config.interval,
            samples: self.overall_samples,
            gc_samples: self.during_gc,
            missed_samples: signals.saturating_sub(self.overall_samples),
            metadata: config.metadata.clone(),
            frames,
            raw: None,
            raw_sample_timestamps: None,
            raw_timestamp_deltas: None,
            sample_tags: None,
            tag_strings: None,
        };

        if !self.raw.is_empty() {
            let drained = self.raw.drain();
            results.raw = Some(drained.raw);
            results.raw_sample_timestamps = Some(drained.timestamps);
            results.raw_timestamp_deltas = Some(drained.deltas);
        }

        if !config.tags.is_empty() || !self.tags.is_empty() {
            let drained = self.tags.drain();
            results.sample_tags = Some(drained.sets);
            results.tag_strings = Some(drained.strings);
        }

        debug!(
            "Drained {} samples ({} gc, {} missed) across {} frames",
            results.samples,
            results.gc_samples,
            results.missed_samples,
            results.frames.len()
        );

        self.overall_samples = 0;
        self.during_gc = 0;
        Some(results)
    }
}

/// State reachable from interrupt context and from the control surface
pub(crate) struct Shared {
    pub host: Box<dyn Host>,
    pub buffer: SampleBuffer,
    pub gc: GcPending,
    pub running: AtomicBool,
    /// Triggers counted while running
    pub signals: AtomicU64,
    /// Allocations seen in object mode
    pub allocations: AtomicU64,
    /// Set in a forked child whose recorder thread did not survive the fork
    pub orphaned: AtomicBool,
    pub session: Mutex<Session>,
}

impl Shared {
    pub fn new(host: Box<dyn Host>) -> Self {
        Shared {
            host,
            buffer: SampleBuffer::new(),
            gc: GcPending::default(),
            running: AtomicBool::new(false),
            signals: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            orphaned: AtomicBool::new(false),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record whatever interrupt context left behind.
    pub fn run_deferred(&self) {
        let mut session = self.lock_session();
        self.run_deferred_locked(&mut session);
    }

    /// The buffered sample and any backfill are recorded in timestamp order:
    /// a sample taken before the first suppressed tick goes first.
    pub fn run_deferred_locked(&self, session: &mut Session) {
        let pending = self.gc.take();
        let buffered_at = self.buffer.pending_timestamp();

        match (pending, buffered_at) {
            (Some(ticks), Some(at)) if at < ticks.first_tick_at => {
                self.record_buffered(session);
                session.record_backfill(ticks, self.host.now_micros());
            }
            (Some(ticks), Some(at)) => {
                session.record_backfill(ticks, at);
                self.record_buffered(session);
            }
            (Some(ticks), None) => session.record_backfill(ticks, self.host.now_micros()),
            (None, Some(_)) => self.record_buffered(session),
            (None, None) => {}
        }
    }

    fn record_buffered(&self, session: &mut Session) {
        self.buffer.consume(|sample| session.record_sample(sample));
    }

    /// Reset the trigger counters for a fresh profile
    pub fn reset_counters(&self) {
        self.signals.store(0, Ordering::Relaxed);
        self.allocations.store(0, Ordering::Relaxed);
    }
}
