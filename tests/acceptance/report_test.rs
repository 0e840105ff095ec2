//! Report round-trip on a real run.
//!
//! Parsing the emitted text must give back exactly
//! `min(K × task_count, log_capacity)` records and the counters line.

use super::common::{assert_record_invariants, run_threads};
use rtdiag_common::config::HarnessConfig;
use rtdiag_common::task::TaskDescriptor;
use rtdiag_runtime::burner::NullBurner;
use rtdiag_runtime::report::Report;
use rtdiag_runtime::workload::HarnessRun;
use std::time::Duration;

fn quick_tasks() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor::new(0, 5, 1, 5, true),
        TaskDescriptor::new(1, 6, 1, 6, true),
        TaskDescriptor::new(2, 8, 2, 8, false),
    ]
}

fn quick_config(log_capacity: usize) -> HarnessConfig {
    HarnessConfig {
        jobs_per_task: 10,
        log_capacity,
        jitter_max: Duration::ZERO,
        stagger: Duration::from_millis(1),
        run_window: Duration::from_millis(500),
        seed: Some(1),
        tasks: quick_tasks(),
        ..Default::default()
    }
}

fn banner_text(run: &HarnessRun) -> String {
    format!(
        "*** rtdiag start ***\n{}*** rtdiag done ({} records) ***\n",
        run.text,
        run.report.len()
    )
}

#[test]
fn test_roundtrip_within_capacity() {
    let outcome = run_threads(quick_config(512), NullBurner);
    let report = &outcome.run.report;
    assert_eq!(report.len(), 30);
    assert_eq!(outcome.run.records_dropped, 0);
    assert_record_invariants(report, &quick_tasks());

    let parsed = Report::parse(&banner_text(&outcome.run)).unwrap();
    assert_eq!(&parsed, report);
}

#[test]
fn test_roundtrip_over_capacity() {
    let outcome = run_threads(quick_config(16), NullBurner);
    let report = &outcome.run.report;
    assert_eq!(report.len(), 16);
    assert_eq!(outcome.run.records_dropped, 14);

    let text = banner_text(&outcome.run);
    let parsed = Report::parse(&text).unwrap();
    assert_eq!(parsed.records, report.records);
    assert_eq!(parsed.stats, report.stats);

    // One header, sixteen records, one counters line
    let block: Vec<&str> = text
        .lines()
        .filter(|l| !l.starts_with("***"))
        .collect();
    assert_eq!(block.len(), 18);
    assert!(block[17].starts_with("kstats,ctx="));
}

#[test]
fn test_config_file_drives_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtdiag.toml");
    std::fs::write(
        &path,
        r#"
jobs_per_task = 4
jitter_max = "2ms"
stagger = "1ms"
run_window = "300ms"
seed = 5

[[tasks]]
id = 7
period_ms = 10
wcet_ms = 1
deadline_ms = 10
critical = true
"#,
    )
    .unwrap();

    let config = HarnessConfig::from_file(&path).unwrap();
    let tasks = config.tasks.clone();
    let outcome = run_threads(config, NullBurner);
    assert_eq!(outcome.run.report.len(), 4);
    assert_eq!(outcome.run.seed, 5);
    assert_record_invariants(&outcome.run.report, &tasks);
}
