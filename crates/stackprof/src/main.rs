use anyhow::Context;
use clap::Parser;
use stackprof::cli::{Cli, Command, RecordArgs};
use stackprof::error::exit_code;
use stackprof::{Mode, Profiler, Results};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

stackprof_alloc::allocator!();

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(stackprof_err) = e.downcast_ref::<stackprof::Error>() {
                ExitCode::from(stackprof_err.exit_code() as u8)
            } else if e.downcast_ref::<InvalidArguments>().is_some() {
                ExitCode::from(exit_code::INVALID_ARGUMENTS as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct InvalidArguments(String);

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Record(args) => record(&args)?,
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "stackprof", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn record(args: &RecordArgs) -> anyhow::Result<()> {
    args.validate()
        .map_err(InvalidArguments)
        .context("Invalid arguments")?;

    let out = args.out.clone().unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%y%m%d%H%M%S");
        std::path::PathBuf::from(format!("stackprof.{}.{}.json", args.mode, timestamp))
    });
    let options = args.options().out(out.clone());

    let mut profiler = Profiler::native().context("Failed to load symbols")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    profiler.start(&options)?;
    match args.duration {
        Some(d) => eprintln!(
            "Recording {:?} workload in {} mode for {}...",
            args.workload,
            args.mode,
            humantime::format_duration(d)
        ),
        None => eprintln!(
            "Recording {:?} workload in {} mode (Ctrl-C to stop)...",
            args.workload, args.mode
        ),
    }

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if let Some(max_duration) = args.duration
            && started.elapsed() >= max_duration
        {
            break;
        }
        args.workload.tick(started);
        if args.mode == Mode::Custom {
            profiler.sample();
        }
    }
    profiler.stop();

    let saved = profiler
        .save_results(None)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    let Some((path, results)) = saved else {
        eprintln!("No samples recorded");
        return Ok(());
    };

    print_summary(&results);
    eprintln!("Output: {}", path.display());
    Ok(())
}

fn print_summary(results: &Results) {
    eprintln!(
        "{} samples ({} gc, {} missed), {} frames",
        results.samples,
        results.gc_samples,
        results.missed_samples,
        results.frames.len()
    );

    let mut frames: Vec<_> = results.frames.values().collect();
    frames.sort_by(|a, b| b.samples.cmp(&a.samples).then(b.total_samples.cmp(&a.total_samples)));

    eprintln!("{:>8} {:>8} {:>7}  FUNCTION", "SAMPLES", "TOTAL", "PCT");
    for frame in frames.iter().take(10) {
        let pct = if results.samples > 0 {
            frame.samples as f64 * 100.0 / results.samples as f64
        } else {
            0.0
        };
        eprintln!(
            "{:>8} {:>8} {:>6.1}%  {}",
            frame.samples, frame.total_samples, pct, frame.name
        );
    }
}
