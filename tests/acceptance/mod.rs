//! Acceptance tests for the rtdiag harness.
//!
//! These tests run complete workloads on OS threads:
//! - Scheduling scenarios (single RT task, mixed RT/BE)
//! - Report emission and parsing round-trip
//!
//! The privileged scenario requires root for SCHED_FIFO priorities.

mod common;
mod report_test;
mod scenario_test;
