use crate::config::{MICROSECONDS_IN_SECOND, Mode, Options};
use crate::workload::Workload;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "stackprof")]
#[command(about = "Sampling call-stack profiler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Profile a built-in workload and write the results
    Record(RecordArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug)]
pub struct RecordArgs {
    /// Trigger mode: wall, cpu, object or custom
    #[arg(long, short = 'm', default_value = "wall")]
    pub mode: Mode,

    /// Microseconds between samples (wall/cpu) or allocations per sample (object)
    #[arg(long, short = 'i')]
    pub interval: Option<u64>,

    /// Keep the raw, time-stamped sample trace
    #[arg(long)]
    pub raw: bool,

    /// Record only samples and leaf counts, no edges or lines
    #[arg(long)]
    pub no_aggregate: bool,

    /// Do not record garbage collection time
    #[arg(long)]
    pub ignore_gc: bool,

    /// Context tag to capture per sample (repeatable)
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,

    /// Metadata attached to the results, as key=value (repeatable)
    #[arg(long = "metadata", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,

    /// Recording duration (default: until Ctrl-C)
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Output path; `.db`/`.sqlite` writes SQLite, anything else JSON
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Workload to profile
    #[arg(long, short = 'w', value_enum, default_value = "mixed")]
    pub workload: Workload,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 30s, 5m, 2h, 1h30m, 90",
        s
    ))
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid metadata '{}'. Expected key=value", s)),
    }
}

impl RecordArgs {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.interval
            && self.mode.uses_timer()
            && (interval == 0 || interval >= MICROSECONDS_IN_SECOND)
        {
            return Err(format!(
                "Interval must be between 1 and {} microseconds, got {}",
                MICROSECONDS_IN_SECOND - 1,
                interval
            ));
        }
        Ok(())
    }

    /// Profiler options for these arguments
    pub fn options(&self) -> Options {
        let mut options = Options::new(self.mode)
            .raw(self.raw)
            .aggregate(!self.no_aggregate)
            .ignore_gc(self.ignore_gc)
            .tags(self.tags.iter().cloned());
        if let Some(interval) = self.interval {
            options = options.interval(interval);
        }
        for (key, value) in &self.metadata {
            options = options.metadata(key.clone(), value.clone());
        }
        if let Some(out) = &self.out {
            options = options.out(out.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(args: &[&str]) -> RecordArgs {
        let cli = Cli::try_parse_from(["stackprof", "record"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Record(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let args = record(&[]);
        assert_eq!(args.mode, Mode::Wall);
        assert_eq!(args.workload, Workload::Mixed);
        assert!(args.interval.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_record_flags() {
        let args = record(&[
            "--mode", "cpu", "-i", "500", "--raw", "--tag", "thread_id", "--metadata",
            "env=ci", "-d", "2s", "-o", "out.db",
        ]);
        assert_eq!(args.mode, Mode::Cpu);
        assert_eq!(args.interval, Some(500));
        assert_eq!(args.tags, vec!["thread_id"]);
        assert_eq!(args.metadata, vec![("env".to_string(), "ci".to_string())]);
        assert_eq!(args.duration, Some(Duration::from_secs(2)));
        assert_eq!(args.options().mode(), Mode::Cpu);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["stackprof", "record", "--mode", "heap"]).is_err());
        assert!(Cli::try_parse_from(["stackprof", "record", "--metadata", "novalue"]).is_err());
        assert!(record(&["-i", "1000000"]).validate().is_err());
        // Object mode interval is an allocation stride
        assert!(record(&["-m", "object", "-i", "1000000"]).validate().is_ok());
    }

    #[test]
    fn test_parse_duration_accepts_bare_seconds() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert!(parse_duration("soon").is_err());
    }
}
