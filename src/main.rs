//! generate-trace: write a synthetic kernel trace of a given size
//!
//! The trace is made of identical `dummy` records sized so the file lands on a
//! packet boundary, optionally followed by a synthesized `sched_switch`
//! timeline. It is written as `trace.pb` inside the output directory.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tracegen::perfetto::filler_layout;
use tracegen::{
    format_size, prepare, run, Config, PerfettoWriter, ScheduleConfig, SchedulePolicy, Task,
    TRACE_FILE_NAME,
};

#[derive(Debug, Parser)]
#[command(name = "generate-trace")]
#[command(about = "Generate a synthetic kernel trace of a given size")]
#[command(version)]
struct Command {
    /// Directory the trace is written to (must exist)
    output_dir: PathBuf,

    /// Trace size, e.g. 32k, 1.5M, "2 GB". Rounded up to the packet size
    #[arg(short, long)]
    size: Option<String>,

    /// JSON config file; command line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text stored in every filler record
    #[arg(long)]
    payload: Option<String>,

    /// Timestamp of the filler records, in milliseconds
    #[arg(long)]
    timestamp_ms: Option<u64>,

    /// Append a synthesized context switch timeline: pair or round-robin
    #[arg(long)]
    schedule: Option<SchedulePolicy>,

    /// Task of the timeline as NAME:ID, in order (repeatable)
    #[arg(long = "task")]
    tasks: Vec<Task>,

    /// First switch of the timeline, in milliseconds
    #[arg(long)]
    start_ms: Option<u64>,

    /// End of the timeline (exclusive), in milliseconds
    #[arg(long)]
    end_ms: Option<u64>,

    /// Time between switches, in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,

    /// CPU the timeline runs on
    #[arg(long)]
    cpu: Option<u32>,

    /// Do not write filler records
    #[arg(long)]
    no_fill: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .compact();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Build the run configuration: defaults, then the config file, then flags.
fn build_config(opts: &Command) -> Result<Config> {
    let mut config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(size) = &opts.size {
        config.size = size.clone();
    }
    if let Some(payload) = &opts.payload {
        config.payload = payload.clone();
    }
    if let Some(ts) = opts.timestamp_ms {
        config.timestamp_ms = ts;
    }
    if opts.no_fill {
        config.fill = false;
    }

    let schedule_flags = !opts.tasks.is_empty()
        || opts.start_ms.is_some()
        || opts.end_ms.is_some()
        || opts.period_ms.is_some()
        || opts.cpu.is_some();

    if let Some(policy) = opts.schedule {
        let mut sched = match config.schedule.take() {
            Some(sched) if sched.policy == policy => sched,
            _ => match policy {
                SchedulePolicy::Pair => ScheduleConfig::default(),
                SchedulePolicy::RoundRobin => ScheduleConfig::round_robin_example(),
            },
        };
        sched.policy = policy;
        config.schedule = Some(sched);
    }

    match config.schedule.as_mut() {
        Some(sched) => {
            if !opts.tasks.is_empty() {
                sched.tasks = opts.tasks.clone();
            }
            if let Some(start) = opts.start_ms {
                sched.start_ms = start;
            }
            if let Some(end) = opts.end_ms {
                sched.end_ms = end;
            }
            if let Some(period) = opts.period_ms {
                sched.period_ms = period;
            }
            if let Some(cpu) = opts.cpu {
                sched.cpu = cpu;
            }
        }
        None if schedule_flags => {
            bail!("--task, --start-ms, --end-ms, --period-ms and --cpu need a schedule (use --schedule)")
        }
        None => {}
    }

    if !config.fill && config.schedule.is_none() {
        bail!("--no-fill without a schedule would write an empty trace");
    }

    Ok(config)
}

fn main() -> Result<()> {
    let opts = Command::parse();
    init_tracing(opts.verbose);

    let mut config = build_config(&opts)?;
    if config.fill {
        config.layout = filler_layout(&config)?;
    }
    debug!(?config, "resolved configuration");

    let plan = prepare(&config)?;
    if plan.size.was_rounded() {
        println!(
            "Rounding up to nearest packet size: {} -> {}",
            format_size(plan.size.requested_size),
            format_size(plan.size.rounded_size)
        );
    }

    let writer = PerfettoWriter::create(&opts.output_dir)
        .with_context(|| format!("Failed to open trace in {}", opts.output_dir.display()))?;
    let report = run(plan, writer)?;

    println!(
        "Wrote {} filler records ({}) and {} sched_switch records to {}",
        report.dummy_records,
        format_size(report.size.rounded_size),
        report.schedule_records,
        opts.output_dir.join(TRACE_FILE_NAME).display()
    );
    Ok(())
}
