//! # tether-process
//!
//! Supervises the processes an agent starts to run the project it edits.
//! Apps run either directly on the host or inside a named container. Stops
//! never fail: host stops are bounded by a timeout, container commands are
//! best effort.

pub mod container;
pub mod logs;
pub mod manager;
pub mod signal;

pub use logs::{ConsoleEntry, LogKind, LogLevel, LogStore};
pub use manager::{ExecutionMode, ProcessConfig, ProcessManager, RunHandle};
