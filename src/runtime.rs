//! Runtime glue that wires configuration, the name sink and writer,
//! telemetry, and runner orchestration.

pub mod config;
pub mod runner;
pub mod sink;
pub mod telemetry;
