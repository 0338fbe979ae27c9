//! Session options and their validation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound (exclusive) for a configured interval
pub const MICROSECONDS_IN_SECOND: u64 = 1_000_000;
/// Default timer interval in microseconds
pub const DEFAULT_TIMER_INTERVAL: u64 = 1000;
/// Default allocation stride in object mode
pub const DEFAULT_ALLOCATION_STRIDE: u64 = 1;
/// Maximum number of configured tag keys
pub const MAX_TAGS: usize = 16;
/// Pseudo-tag filled with the sampled thread's id
pub const THREAD_ID_TAG: &str = "thread_id";

/// What triggers a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wall-clock interval timer
    #[default]
    Wall,
    /// CPU-time interval timer
    Cpu,
    /// Every Nth allocation
    Object,
    /// Only explicit `sample()` calls
    Custom,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Wall => "wall",
            Mode::Cpu => "cpu",
            Mode::Object => "object",
            Mode::Custom => "custom",
        }
    }

    pub fn uses_timer(self) -> bool {
        matches!(self, Mode::Wall | Mode::Cpu)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wall" => Ok(Mode::Wall),
            "cpu" => Ok(Mode::Cpu),
            "object" => Ok(Mode::Object),
            "custom" => Ok(Mode::Custom),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// A validated tag key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKey {
    ThreadId,
    Named(String),
}

impl TagKey {
    pub fn as_str(&self) -> &str {
        match self {
            TagKey::ThreadId => THREAD_ID_TAG,
            TagKey::Named(name) => name,
        }
    }
}

/// Options for one profiling session.
///
/// ```
/// use stackprof::{Mode, Options};
///
/// let options = Options::new(Mode::Cpu).interval(500).raw(true).tag("thread_id");
/// assert_eq!(options.mode(), Mode::Cpu);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    mode: Mode,
    interval: Option<u64>,
    raw: bool,
    aggregate: Option<bool>,
    ignore_gc: bool,
    tags: Vec<String>,
    metadata: BTreeMap<String, String>,
    out: Option<PathBuf>,
}

impl Options {
    pub fn new(mode: Mode) -> Self {
        Options {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Microseconds between samples, or the allocation stride in object mode
    pub fn interval(mut self, interval: u64) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Keep the time-ordered sample log
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Track edges and line counts (default true)
    pub fn aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// Sample through GC pauses instead of backfilling them
    pub fn ignore_gc(mut self, ignore_gc: bool) -> Self {
        self.ignore_gc = ignore_gc;
        self
    }

    pub fn tag(mut self, key: impl Into<String>) -> Self {
        self.tags.push(key.into());
        self
    }

    pub fn tags<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a JSON object into the metadata. Non-string values are stored
    /// in their JSON form.
    pub fn metadata_json(mut self, value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(Error::InvalidMetadata(format!(
                "expected an object, got {}",
                json_kind(&value)
            )));
        };
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            self.metadata.insert(key, value);
        }
        Ok(self)
    }

    /// Default destination for `Profiler::write_results(None)`
    pub fn out(mut self, path: impl Into<PathBuf>) -> Self {
        self.out = Some(path.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<Config> {
        let interval = match self.mode {
            Mode::Custom => None,
            Mode::Object => Some(self.interval.unwrap_or(DEFAULT_ALLOCATION_STRIDE)),
            Mode::Wall | Mode::Cpu => Some(self.interval.unwrap_or(DEFAULT_TIMER_INTERVAL)),
        };
        if let Some(interval) = interval
            && !(1..MICROSECONDS_IN_SECOND).contains(&interval)
        {
            return Err(Error::InvalidInterval(interval));
        }

        Ok(Config {
            mode: self.mode,
            interval,
            raw: self.raw,
            aggregate: self.aggregate.unwrap_or(true),
            ignore_gc: self.ignore_gc,
            tags: parse_tags(&self.tags)?,
            metadata: self.metadata.clone(),
            out: self.out.clone(),
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn parse_tags(keys: &[String]) -> Result<Vec<TagKey>> {
    if keys.len() > MAX_TAGS {
        return Err(Error::InvalidTags(format!(
            "at most {MAX_TAGS} tags are supported, got {}",
            keys.len()
        )));
    }

    let mut parsed: Vec<TagKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if key.is_empty() || key.chars().any(char::is_control) {
            return Err(Error::InvalidTags(format!("malformed tag key {key:?}")));
        }
        let tag = if key == THREAD_ID_TAG {
            TagKey::ThreadId
        } else {
            TagKey::Named(key.clone())
        };
        if parsed.contains(&tag) {
            return Err(Error::InvalidTags(format!("duplicate tag key {key:?}")));
        }
        parsed.push(tag);
    }
    Ok(parsed)
}

/// Validated options, fixed for the duration of one start/stop span
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Config {
    pub mode: Mode,
    pub interval: Option<u64>,
    pub raw: bool,
    pub aggregate: bool,
    pub ignore_gc: bool,
    pub tags: Vec<TagKey>,
    pub metadata: BTreeMap<String, String>,
    pub out: Option<PathBuf>,
}
