//! Sampling call-stack profiler.
//!
//! A [`Profiler`] takes periodic snapshots of the running thread's call stack,
//! driven by a wall-clock or CPU-time timer, by allocations, or by explicit
//! calls, and aggregates them into per-frame counts, caller/callee edges and
//! per-line counts. Optionally it keeps a raw, time-stamped trace of every
//! sample and per-sample context tags.

pub mod aggregate;
mod buffer;
pub mod cli;
pub mod config;
mod deferred;
pub mod error;
pub mod frame;
mod gc;
pub mod host;
pub mod native;
pub mod profiler;
pub mod raw;
pub mod results;
pub mod rle;
mod session;
pub mod sink;
pub mod tag;
pub mod tags;
mod timer;
mod trigger;
pub mod workload;

#[cfg(test)]
mod testing;

pub use config::{Mode, Options};
pub use error::{Error, Result};
pub use frame::FrameId;
pub use host::{FrameInfo, GcPhase, Host, TagLookup, WalkOrigin};
pub use native::NativeHost;
pub use profiler::Profiler;
pub use results::{FrameReport, Results};
