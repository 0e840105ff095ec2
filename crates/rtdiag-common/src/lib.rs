#![doc = "Common types shared across the rtdiag workspace."]

pub mod config;
pub mod error;
pub mod stats;
pub mod state;
pub mod task;

pub use config::*;
pub use error::*;
pub use stats::*;
pub use state::*;
pub use task::*;
