//! Report emission and parsing.
//!
//! Text format, in order:
//!
//! ```text
//! task_id,job_id,release_ms,start_ms,finish_ms,deadline_ms,met
//! 0,0,50,50,58,100,1
//! ...
//! kstats,ctx=412,preempt=37,readyq_max=6,readyq_cur=0
//! ```
//!
//! `deadline_ms` is the absolute deadline. Lines before the header and
//! after the `kstats` trailer are free text and ignored by [`Report::parse`].

use crate::counters::SchedulerObserver;
use crate::exec_log::ExecutionLog;
use rtdiag_common::stats::SchedStats;
use rtdiag_common::task::JobRecord;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;

/// Column header of the record block.
pub const REPORT_HEADER: &str = "task_id,job_id,release_ms,start_ms,finish_ms,deadline_ms,met";

/// First field of the counters trailer line.
pub const STATS_PREFIX: &str = "kstats";

const RECORD_FIELDS: usize = 7;

/// Report parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportParseError {
    /// No header line found.
    #[error("report header not found")]
    MissingHeader,

    /// Records were not followed by a `kstats` line.
    #[error("kstats trailer not found")]
    MissingStats,

    /// A record line has the wrong number of fields.
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        /// 1-based line number.
        line: usize,
        /// Fields required.
        expected: usize,
        /// Fields present.
        found: usize,
    },

    /// A field is not a valid unsigned integer (or `0`/`1` for `met`).
    #[error("line {line}: invalid {field} value {value:?}")]
    InvalidField {
        /// 1-based line number.
        line: usize,
        /// Column name.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// The `kstats` line is missing a counter or has a malformed entry.
    #[error("line {line}: malformed kstats entry {entry:?}")]
    MalformedStats {
        /// 1-based line number.
        line: usize,
        /// Offending entry or missing key.
        entry: String,
    },
}

/// Records plus one counters snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Report {
    /// Retained records in append order.
    pub records: Vec<JobRecord>,
    /// Scheduler counters taken after the records were read.
    pub stats: SchedStats,
}

/// Write the report straight from the log, holding its lock while the
/// records are serialized, then snapshot the counters and write the
/// trailer. Returns the report that was written.
///
/// # Errors
///
/// Returns any error from `out`.
pub fn emit_text<W: Write>(
    log: &ExecutionLog,
    observer: &dyn SchedulerObserver,
    out: &mut W,
) -> io::Result<Report> {
    let records = log.with_records(|records| -> io::Result<Vec<JobRecord>> {
        write_records(out, records)?;
        Ok(records.to_vec())
    })?;
    let stats = observer.snapshot();
    writeln!(out, "{}", format_stats(&stats))?;
    Ok(Report { records, stats })
}

fn write_records<W: Write>(out: &mut W, records: &[JobRecord]) -> io::Result<()> {
    writeln!(out, "{REPORT_HEADER}")?;
    for record in records {
        writeln!(out, "{}", format_record(record))?;
    }
    Ok(())
}

/// One record line.
#[must_use]
pub fn format_record(r: &JobRecord) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        r.task_id,
        r.job_id,
        r.release_ms,
        r.start_ms,
        r.finish_ms,
        r.deadline_ms,
        u8::from(r.met)
    )
}

/// The counters trailer line.
#[must_use]
pub fn format_stats(s: &SchedStats) -> String {
    format!(
        "{STATS_PREFIX},ctx={},preempt={},readyq_max={},readyq_cur={}",
        s.context_switches, s.preemptions, s.ready_queue_len_max, s.ready_queue_len_current
    )
}

impl Report {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the report holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records belonging to one task, in append order.
    pub fn task_records(&self, task_id: u32) -> impl Iterator<Item = &JobRecord> {
        self.records.iter().filter(move |r| r.task_id == task_id)
    }

    /// Jobs that finished past their deadline.
    #[must_use]
    pub fn deadline_misses(&self) -> usize {
        self.records.iter().filter(|r| !r.met).count()
    }

    /// Text form as a string, identical to what [`emit_text`] writes.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut buf = Vec::with_capacity((self.records.len() + 2) * 32);
        // Writes into a Vec cannot fail
        let _ = write_records(&mut buf, &self.records);
        let _ = writeln!(buf, "{}", format_stats(&self.stats));
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse the text form, ignoring banner lines around it.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or trailer is missing or a field
    /// does not parse.
    pub fn parse(text: &str) -> Result<Self, ReportParseError> {
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

        if !lines.by_ref().any(|(_, l)| l == REPORT_HEADER) {
            return Err(ReportParseError::MissingHeader);
        }

        let mut records = Vec::new();
        for (line, content) in lines {
            if content.is_empty() {
                continue;
            }
            if content.starts_with(STATS_PREFIX) {
                let stats = parse_stats(line, content)?;
                return Ok(Self { records, stats });
            }
            records.push(parse_record(line, content)?);
        }
        Err(ReportParseError::MissingStats)
    }
}

impl FromStr for Report {
    type Err = ReportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_field<T: FromStr>(line: usize, field: &'static str, value: &str) -> Result<T, ReportParseError> {
    value.parse().map_err(|_| ReportParseError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}

fn parse_record(line: usize, content: &str) -> Result<JobRecord, ReportParseError> {
    let fields: Vec<&str> = content.split(',').map(str::trim).collect();
    if fields.len() != RECORD_FIELDS {
        return Err(ReportParseError::FieldCount {
            line,
            expected: RECORD_FIELDS,
            found: fields.len(),
        });
    }
    let met = match fields[6] {
        "0" => false,
        "1" => true,
        other => {
            return Err(ReportParseError::InvalidField {
                line,
                field: "met",
                value: other.to_string(),
            })
        }
    };
    Ok(JobRecord {
        task_id: parse_field(line, "task_id", fields[0])?,
        job_id: parse_field(line, "job_id", fields[1])?,
        release_ms: parse_field(line, "release_ms", fields[2])?,
        start_ms: parse_field(line, "start_ms", fields[3])?,
        finish_ms: parse_field(line, "finish_ms", fields[4])?,
        deadline_ms: parse_field(line, "deadline_ms", fields[5])?,
        met,
    })
}

fn parse_stats(line: usize, content: &str) -> Result<SchedStats, ReportParseError> {
    let mut ctx = None;
    let mut preempt = None;
    let mut readyq_max = None;
    let mut readyq_cur = None;

    for entry in content.split(',').skip(1).map(str::trim) {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ReportParseError::MalformedStats {
                line,
                entry: entry.to_string(),
            });
        };
        match key {
            "ctx" => ctx = Some(parse_field(line, "ctx", value)?),
            "preempt" => preempt = Some(parse_field(line, "preempt", value)?),
            "readyq_max" => readyq_max = Some(parse_field(line, "readyq_max", value)?),
            "readyq_cur" => readyq_cur = Some(parse_field(line, "readyq_cur", value)?),
            _ => {
                return Err(ReportParseError::MalformedStats {
                    line,
                    entry: entry.to_string(),
                })
            }
        }
    }

    let missing = |key: &str| ReportParseError::MalformedStats {
        line,
        entry: format!("missing {key}"),
    };
    Ok(SchedStats {
        context_switches: ctx.ok_or_else(|| missing("ctx"))?,
        preemptions: preempt.ok_or_else(|| missing("preempt"))?,
        ready_queue_len_max: readyq_max.ok_or_else(|| missing("readyq_max"))?,
        ready_queue_len_current: readyq_cur.ok_or_else(|| missing("readyq_cur"))?,
    })
}
