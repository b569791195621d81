#![warn(missing_docs)]

//! zd daemon: task configuration, the scheduling loop and the `zd` command line

pub mod cli;
pub mod config;
pub mod daemon;

pub use config::{ConfigError, TaskConfig, ZdConfig};
pub use daemon::Daemon;
