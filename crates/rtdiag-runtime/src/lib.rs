#![doc = "Instrumentation and periodic job engine for the rtdiag harness."]

pub mod burner;
pub mod counters;
pub mod exec_log;
pub mod jitter;
pub mod job_runner;
pub mod platform;
pub mod realtime;
pub mod report;
pub mod spinlock;
pub mod workload;

#[cfg(test)]
pub(crate) mod test_support;

pub use burner::*;
pub use counters::*;
pub use exec_log::*;
pub use jitter::Jitter;
pub use job_runner::*;
pub use platform::*;
pub use realtime::*;
pub use report::*;
pub use spinlock::*;
pub use workload::*;
