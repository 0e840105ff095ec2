//! rtdiag entry point.
//!
//! Runs the configured periodic workload on OS threads, waits out the
//! run window, and prints the per-job timing report followed by the
//! scheduler counters. Logs go to stderr; stdout carries only the report.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rtdiag_common::config::HarnessConfig;
use rtdiag_runtime::burner::SpinBurner;
use rtdiag_runtime::counters::{DiagCounters, SchedulerObserver};
use rtdiag_runtime::platform::ThreadPlatform;
use rtdiag_runtime::workload::{Harness, HarnessRun};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Report encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Header, one line per job, kstats trailer.
    Text,
    /// The same report as a JSON document.
    Json,
}

/// rtdiag command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtdiag",
    about = "Scheduler diagnostic harness - periodic RT/BE workload with per-job timing report",
    version,
    long_about = None
)]
struct Args {
    /// Path to a harness configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Jobs per task (overrides config file).
    #[arg(long, short = 'k', value_name = "N")]
    jobs: Option<u32>,

    /// Execution log capacity in records (overrides config file).
    #[arg(long, value_name = "N")]
    log_capacity: Option<usize>,

    /// Jitter seed (overrides config file).
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Disable release jitter.
    #[arg(long)]
    no_jitter: bool,

    /// Wait after the last unit is created, e.g. "5s" (overrides config file).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_window: Option<Duration>,

    /// Report format.
    #[arg(long, short = 'f', value_enum, default_value = "text")]
    format: OutputFormat,

    /// Write the report to a file instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        sched_diag = DiagCounters::enabled(),
        "Starting rtdiag"
    );

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    if args.print_config {
        let toml = config.to_toml().context("Failed to serialize configuration")?;
        print!("{toml}");
        return Ok(());
    }

    info!(
        tasks = config.tasks.len(),
        jobs_per_task = config.jobs_per_task,
        run_window = %humantime::format_duration(config.run_window),
        realtime = config.realtime.enabled,
        "Configuration loaded"
    );

    let run = run_harness(config)?;
    let rendered = render(&run, args.format)?;
    write_report(args.output.as_deref(), &rendered)?;

    if run.units_unfinished > 0 {
        warn!(
            unfinished = run.units_unfinished,
            "Report is partial; increase the run window to capture every job"
        );
    }
    info!(records = run.report.len(), seed = run.seed, "rtdiag finished");
    Ok(())
}

/// Initialize logging on stderr with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "rtdiag={level},rtdiag_harness={level},rtdiag_runtime={level},rtdiag_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTDIAG_CONFIG_PATH` environment variable
/// 3. `config/rtdiag.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<HarnessConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RTDIAG_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTDIAG_CONFIG_PATH");
            return HarnessConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTDIAG_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RTDIAG_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/rtdiag.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return HarnessConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(HarnessConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut HarnessConfig, args: &Args) {
    if let Some(jobs) = args.jobs {
        config.jobs_per_task = jobs;
    }
    if let Some(capacity) = args.log_capacity {
        config.log_capacity = capacity;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.no_jitter {
        config.jitter_max = Duration::ZERO;
    }
    if let Some(window) = args.run_window {
        config.run_window = window;
    }
}

/// Wire the production observer, platform, and burner, then run.
fn run_harness(config: HarnessConfig) -> Result<HarnessRun> {
    let counters = Arc::new(DiagCounters::new());
    let observer: Arc<dyn SchedulerObserver> = counters;
    let platform = Arc::new(ThreadPlatform::new(
        Arc::clone(&observer),
        config.realtime.clone(),
    ));

    let harness = Harness::new(config, platform, Arc::new(SpinBurner), observer)
        .context("Invalid workload configuration")?;
    harness.run().context("Harness run failed")
}

/// Render the report, with start/done banners around the emitted text.
fn render(run: &HarnessRun, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format!(
            "*** rtdiag start ***\n{}*** rtdiag done ({} records) ***\n",
            run.text,
            run.report.len()
        )),
        OutputFormat::Json => {
            let mut json = run
                .report
                .to_json()
                .context("Failed to encode report as JSON")?;
            json.push('\n');
            Ok(json)
        }
    }
}

fn write_report(output: Option<&std::path::Path>, rendered: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {path:?}"))?;
            info!(?path, "Report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .context("Failed to write report to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtdiag_common::task::{JobRecord, TaskDescriptor};
    use rtdiag_runtime::exec_log::ExecutionLog;
    use rtdiag_runtime::report::{emit_text, Report};

    fn sample_run() -> HarnessRun {
        let task = TaskDescriptor::new(0, 50, 8, 50, true);
        let log = ExecutionLog::new(4);
        log.append(JobRecord::new(&task, 0, 50, 50, 58)).unwrap();
        log.append(JobRecord::new(&task, 1, 100, 101, 109)).unwrap();

        let mut text = Vec::new();
        let report = emit_text(&log, &DiagCounters::new(), &mut text).unwrap();
        HarnessRun {
            report,
            text: String::from_utf8(text).unwrap(),
            units_spawned: 1,
            spawn_failures: 0,
            units_unfinished: 0,
            records_dropped: 0,
            seed: 1,
        }
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["rtdiag"]);
        assert!(args.config.is_none());
        assert_eq!(args.format, OutputFormat::Text);
        assert!(!args.no_jitter);
        assert!(!args.print_config);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "rtdiag",
            "-c",
            "bench.toml",
            "--jobs",
            "3",
            "--log-capacity",
            "64",
            "--seed",
            "99",
            "--no-jitter",
            "--run-window",
            "750ms",
            "--format",
            "json",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("bench.toml")));
        assert_eq!(args.format, OutputFormat::Json);

        let mut config = HarnessConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.jobs_per_task, 3);
        assert_eq!(config.log_capacity, 64);
        assert_eq!(config.seed, Some(99));
        assert_eq!(config.jitter_max, Duration::ZERO);
        assert_eq!(config.run_window, Duration::from_millis(750));
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = Args::parse_from(["rtdiag"]);
        let mut config = HarnessConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.jobs_per_task, 10);
        assert_eq!(config.jitter_max, Duration::from_millis(10));
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_invalid_run_window_rejected() {
        assert!(Args::try_parse_from(["rtdiag", "--run-window", "soon"]).is_err());
    }

    #[test]
    fn test_load_config_from_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtdiag.toml");
        std::fs::write(&path, "jobs_per_task = 2\nlog_capacity = 8\n").unwrap();

        let args = Args::parse_from(["rtdiag", "--config", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.jobs_per_task, 2);
        assert_eq!(config.log_capacity, 8);

        let args = Args::parse_from(["rtdiag", "--config", "/nonexistent/rtdiag.toml"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_text_render_has_banners_and_parses() {
        let run = sample_run();
        let text = render(&run, OutputFormat::Text).unwrap();
        assert!(text.starts_with("*** rtdiag start ***\n"));
        assert!(text.ends_with("*** rtdiag done (2 records) ***\n"));
        assert!(text.contains(&run.text));
        assert_eq!(Report::parse(&text).unwrap(), run.report);
    }

    #[test]
    fn test_json_render() {
        let run = sample_run();
        let json = render(&run, OutputFormat::Json).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run.report);
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_report(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
